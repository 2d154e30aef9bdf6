//! The `FactStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `emem-store-fs`). The
//! command-line layer depends on this abstraction, not on a concrete backend.
//! Every method is a blocking call that either completes or fails; a store is
//! assumed to have a single writer.

use crate::{
  compile::{ApplyInput, ApplyReport, CompileRequest},
  index::IndexEntry,
  observation::{NewObservation, Observation},
  resolution::{Resolution, TimelineEntry, TimelineQuery},
};

pub trait FactStore {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Observations ──────────────────────────────────────────────────────

  /// Append an observation to the global or run-scoped log.
  fn observe(&self, input: NewObservation) -> Result<Observation, Self::Error>;

  // ── Compilation ───────────────────────────────────────────────────────

  /// Build a compile request from the most recent `limit` observations,
  /// run-scoped ones first.
  fn compile_prepare(
    &self,
    run_id: Option<&str>,
    limit: usize,
  ) -> Result<CompileRequest, Self::Error>;

  /// Validate a compile response and apply its proposals.
  ///
  /// Every proposal is checked before anything is written; a validation or
  /// provenance failure leaves the store untouched.
  fn compile_apply(&self, input: ApplyInput) -> Result<ApplyReport, Self::Error>;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Rules for `model_id` whose range contains `fw_version`, most specific
  /// first.
  fn search(
    &self,
    model_id: &str,
    fw_version: &str,
  ) -> Result<Vec<IndexEntry>, Self::Error>;

  /// The stored text of a live profile rule, verbatim.
  fn show(&self, model_id: &str, rule_id: &str) -> Result<String, Self::Error>;

  /// Merge the facts of every matching rule into one effective profile.
  fn resolve(
    &self,
    model_id: &str,
    fw_version: &str,
    instance_id: Option<&str>,
  ) -> Result<Resolution, Self::Error>;

  /// Observations and history events in timestamp order.
  fn timeline(
    &self,
    query: &TimelineQuery,
  ) -> Result<Vec<TimelineEntry>, Self::Error>;

  /// Unified diff between two stored revisions of a profile rule.
  fn diff(
    &self,
    model_id: &str,
    rule_id: &str,
    rev_from: &str,
    rev_to: &str,
  ) -> Result<String, Self::Error>;
}
