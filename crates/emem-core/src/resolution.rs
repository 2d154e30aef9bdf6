//! Read models: resolved profiles and the timeline.
//!
//! Neither is ever stored; both are computed from the artifacts and logs on
//! every call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::index::IndexEntry;

// ─── Resolution ─────────────────────────────────────────────────────────────

/// A rule that contributed to a resolved profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
  pub rule_id:  String,
  pub fw_range: String,
  pub path:     String,
}

impl From<&IndexEntry> for MatchedRule {
  fn from(entry: &IndexEntry) -> Self {
    Self {
      rule_id:  entry.rule_id.clone(),
      fw_range: entry.fw_range.clone(),
      path:     entry.path.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveProfile {
  /// The merged fact tree.
  pub facts:            Value,
  /// Matching rules, most specific first.
  pub matched_rules:    Vec<MatchedRule>,
  /// Instance whose live override was merged over the rules, if any.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub applied_override: Option<String>,
}

/// The answer to a resolve query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
  pub schema_version:    String,
  pub model_id:          String,
  pub fw_version:        String,
  pub instance_id:       Option<String>,
  pub effective_profile: EffectiveProfile,
}

// ─── Timeline ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineKind {
  Observation,
  History,
}

/// One timeline row; `data` is the raw log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
  pub ts:   Option<String>,
  pub kind: TimelineKind,
  pub data: Value,
}

/// Parameters for [`crate::store::FactStore::timeline`].
#[derive(Debug, Clone, Default)]
pub struct TimelineQuery {
  /// Only observations about this model. History is never filtered.
  pub model_id: Option<String>,
  /// Only this run's observations; all runs when unset.
  pub run_id:   Option<String>,
  /// Keep the most recent `limit` rows (at least one).
  pub limit:    usize,
}
