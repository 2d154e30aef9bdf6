//! Rule, candidate, and override artifacts.
//!
//! Proposals arrive from an external reasoning step and may carry attributes
//! this crate does not know about. Every proposal type keeps those in a
//! flattened `extra` map so they survive into the stored artifact verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display};

use crate::SCHEMA_VERSION;

// ─── Artifact kinds ─────────────────────────────────────────────────────────

/// The three kinds of revisioned artifact. The string form names both the
/// revision directory and the `<kind>_upsert` history event.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArtifactKind {
  Profiles,
  Candidates,
  Overrides,
}

impl ArtifactKind {
  pub fn upsert_event(self) -> String { format!("{self}_upsert") }
}

// ─── Provenance ─────────────────────────────────────────────────────────────

/// The observations that justify a proposal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
  #[serde(default)]
  pub observation_ids: Vec<String>,
  #[serde(flatten)]
  pub extra:           Map<String, Value>,
}

// ─── Profile rules ──────────────────────────────────────────────────────────

/// A profile rule, as proposed and as stored.
///
/// Required attributes are optional here so that a hand-edited artifact
/// missing one still indexes; the compile transaction enforces presence on
/// proposals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRule {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id:         Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fw_range:   Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confidence: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority:   Option<i64>,
  #[serde(default)]
  pub provenance: Provenance,
  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub facts:      Value,
  #[serde(flatten)]
  pub extra:      Map<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
}

/// A live profile-rule file: `spec/memory/profiles/<model>/<rule>.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRuleDoc {
  pub schema_version: String,
  pub model_id:       String,
  #[serde(default)]
  pub rules:          Vec<ProfileRule>,
}

impl ProfileRuleDoc {
  pub fn single(model_id: &str, rule: ProfileRule) -> Self {
    Self {
      schema_version: SCHEMA_VERSION.to_owned(),
      model_id:       model_id.to_owned(),
      rules:          vec![rule],
    }
  }

  /// The rule with the given id, or the first rule when none carries it.
  pub fn rule(&self, rule_id: &str) -> Option<&ProfileRule> {
    self
      .rules
      .iter()
      .find(|r| r.id.as_deref() == Some(rule_id))
      .or_else(|| self.rules.first())
  }
}

// ─── Candidates ─────────────────────────────────────────────────────────────

/// An explicitly proposed candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateProposal {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub model_id:   Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id:         Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confidence: Option<f64>,
  #[serde(default)]
  pub provenance: Provenance,
  #[serde(flatten)]
  pub extra:      Map<String, Value>,
}

/// A candidate generated because a proposal fell below its confidence
/// threshold. `proposal` holds the proposed item untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedCandidate {
  pub id:         String,
  pub model_id:   String,
  pub confidence: f64,
  pub provenance: Provenance,
  pub proposal:   Value,
  pub reason:     String,
}

/// A staged candidate file: `spec/memory/candidates/<model>/<id>.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDoc {
  pub schema_version: String,
  pub model_id:       String,
  pub candidate:      Value,
}

// ─── Overrides ──────────────────────────────────────────────────────────────

/// An instance-scoped override proposal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideProposal {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub instance_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confidence:  Option<f64>,
  #[serde(default)]
  pub provenance:  Provenance,
  #[serde(flatten)]
  pub extra:       Map<String, Value>,
}

impl OverrideProposal {
  /// The override's `facts` mapping, if it carries one.
  pub fn facts(&self) -> Option<&Value> {
    self.extra.get("facts").filter(|v| v.is_object())
  }
}

/// A live override file: `data/memory/overrides/<instance>.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideDoc {
  pub schema_version: String,
  pub instance_id:    String,
  #[serde(rename = "override")]
  pub body:           Value,
}

/// Serialise `body` as a mapping with `updated_at` appended last.
pub fn stamped<T: Serialize>(body: &T, updated_at: &str) -> serde_json::Result<Value> {
  let mut value = serde_json::to_value(body)?;
  if let Value::Object(map) = &mut value {
    map.insert("updated_at".to_owned(), Value::String(updated_at.to_owned()));
  }
  Ok(value)
}
