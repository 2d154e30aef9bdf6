//! History log records.
//!
//! The history log is an append-only JSON-lines file holding one record per
//! artifact write plus one summary per successful compile transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind tag of the transaction-level summary.
pub const COMPILE_APPLY: &str = "compile_apply";

/// A single artifact write: which revision the live file moved from and to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEvent {
  pub ts:       DateTime<Utc>,
  /// `<kind>_upsert`, e.g. `profiles_upsert`.
  pub kind:     String,
  pub model_id: Option<String>,
  pub key:      String,
  pub path:     String,
  pub from_rev: Option<String>,
  pub to_rev:   String,
}

/// Summary of one successful compile transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
  pub ts:            DateTime<Utc>,
  pub kind:          String,
  pub input:         String,
  pub request:       Option<String>,
  pub request_id:    String,
  pub changed_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryEvent {
  Apply(ApplySummary),
  Artifact(ArtifactEvent),
}

impl HistoryEvent {
  pub fn ts(&self) -> DateTime<Utc> {
    match self {
      Self::Apply(e) => e.ts,
      Self::Artifact(e) => e.ts,
    }
  }

  pub fn kind(&self) -> &str {
    match self {
      Self::Apply(e) => &e.kind,
      Self::Artifact(e) => &e.kind,
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn untagged_records_round_trip_to_the_right_variant() {
    let line = json!({
      "ts": "2026-01-01T00:00:00Z",
      "kind": "compile_apply",
      "input": "/tmp/resp.json",
      "request": null,
      "request_id": "abc",
      "changed_paths": ["spec/memory/profiles/m/r.yaml"],
    });
    let event: HistoryEvent = serde_json::from_value(line).unwrap();
    assert!(matches!(event, HistoryEvent::Apply(_)));
    assert_eq!(event.kind(), COMPILE_APPLY);

    let line = json!({
      "ts": "2026-01-01T00:00:00Z",
      "kind": "profiles_upsert",
      "model_id": "m",
      "key": "r",
      "path": "spec/memory/profiles/m/r.yaml",
      "from_rev": null,
      "to_rev": "0123456789ab",
    });
    let event: HistoryEvent = serde_json::from_value(line).unwrap();
    assert!(matches!(event, HistoryEvent::Artifact(_)));
  }
}
