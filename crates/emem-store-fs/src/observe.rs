//! Observation logs: the global log plus one log per run.

use std::{collections::HashSet, path::PathBuf};

use chrono::Utc;
use emem_core::{
  contract::{Contract, ContractValidator},
  observation::{NewObservation, Observation},
};
use serde::Deserialize;
use tracing::debug;

use crate::{
  Layout, Result,
  files::{append_jsonl, read_jsonl, subdirs},
  layout::check_segment,
};

/// Any log line carrying a string id.
#[derive(Deserialize)]
struct IdOnly {
  id: String,
}

pub struct ObservationLog<'a> {
  layout: &'a Layout,
}

impl<'a> ObservationLog<'a> {
  pub fn new(layout: &'a Layout) -> Self { Self { layout } }

  /// Stamp and append an observation; returns it as written.
  pub fn append(
    &self,
    validator: &dyn ContractValidator,
    input: NewObservation,
  ) -> Result<Observation> {
    let target = match &input.run_id {
      Some(run_id) => {
        check_segment("run_id", run_id)?;
        self.layout.run_observations(run_id)
      }
      None => self.layout.global_observations(),
    };
    let observation = input.into_observation(Utc::now());
    validator.validate(Contract::Observation, &serde_json::to_value(&observation)?)?;
    append_jsonl(&target, &observation)?;
    debug!(id = %observation.id, path = %target.display(), "observation appended");
    Ok(observation)
  }

  /// Every run-scoped log that exists, sorted by run id.
  pub fn run_logs(&self) -> Result<Vec<PathBuf>> {
    Ok(
      subdirs(&self.layout.runs_dir())?
        .into_iter()
        .map(|dir| dir.join("observations.jsonl"))
        .filter(|path| path.is_file())
        .collect(),
    )
  }

  /// Ids present in the global log or any run-scoped log.
  pub fn available_ids(&self) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();
    let mut logs = vec![self.layout.global_observations()];
    logs.extend(self.run_logs()?);
    for log in logs {
      ids.extend(read_jsonl::<IdOnly>(&log)?.into_iter().map(|row| row.id));
    }
    Ok(ids)
  }

  /// The most recent `limit` observations (at least one): the run's log
  /// first when `run_id` is set, then the global log. The window keeps the
  /// tail, so the oldest entries are dropped.
  pub fn window(&self, run_id: Option<&str>, limit: usize) -> Result<Vec<Observation>> {
    let mut observations = Vec::new();
    if let Some(run_id) = run_id {
      check_segment("run_id", run_id)?;
      observations.extend(read_jsonl(&self.layout.run_observations(run_id))?);
    }
    observations.extend(read_jsonl(&self.layout.global_observations())?);
    let keep = limit.max(1);
    let skip = observations.len().saturating_sub(keep);
    Ok(observations.split_off(skip))
  }
}
