//! Interleaved view of observations and history events.

use chrono::{DateTime, Utc};
use emem_core::resolution::{TimelineEntry, TimelineKind, TimelineQuery};
use serde_json::Value;

use crate::{Layout, Result, files::read_jsonl, layout::check_segment, observe::ObservationLog};

fn entry(kind: TimelineKind, data: Value) -> TimelineEntry {
  TimelineEntry {
    ts: data.get("ts").and_then(Value::as_str).map(str::to_owned),
    kind,
    data,
  }
}

fn sort_key(entry: &TimelineEntry) -> Option<DateTime<Utc>> {
  entry
    .ts
    .as_deref()
    .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
    .map(|ts| ts.with_timezone(&Utc))
}

/// Observations (filtered by model when asked) and every history event,
/// oldest first, keeping the most recent `limit` rows. Rows whose timestamp
/// does not parse sort first.
pub fn timeline(layout: &Layout, query: &TimelineQuery) -> Result<Vec<TimelineEntry>> {
  let logs = match &query.run_id {
    Some(run_id) => {
      check_segment("run_id", run_id)?;
      vec![layout.run_observations(run_id)]
    }
    None => {
      let mut logs = vec![layout.global_observations()];
      logs.extend(ObservationLog::new(layout).run_logs()?);
      logs
    }
  };

  let mut entries = Vec::new();
  for log in logs {
    for obs in read_jsonl::<Value>(&log)? {
      let keep = query.model_id.as_deref().is_none_or(|model_id| {
        obs.pointer("/subject/model_id").and_then(Value::as_str) == Some(model_id)
      });
      if keep {
        entries.push(entry(TimelineKind::Observation, obs));
      }
    }
  }
  entries.extend(
    read_jsonl::<Value>(&layout.history())?
      .into_iter()
      .map(|event| entry(TimelineKind::History, event)),
  );

  entries.sort_by_cached_key(sort_key);
  let skip = entries.len().saturating_sub(query.limit.max(1));
  Ok(entries.split_off(skip))
}
