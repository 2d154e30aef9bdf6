//! Compile request / response documents and confidence policy.
//!
//! A compile request is a window of observations handed to an external
//! reasoning step. That step answers with a compile response: a batch of
//! proposed profile rules, candidates, and overrides, each citing the
//! observations that justify it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  observation::Observation,
  rule::{CandidateProposal, OverrideProposal, ProfileRule},
};

// ─── Policy ─────────────────────────────────────────────────────────────────

/// Confidence thresholds applied by the compile transaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
  pub min_confidence_profile:             f64,
  pub min_confidence_override:            f64,
  /// Route below-threshold proposals to candidates instead of writing them
  /// live.
  pub write_low_confidence_to_candidates: bool,
}

impl Default for Policy {
  fn default() -> Self {
    Self {
      min_confidence_profile:             0.85,
      min_confidence_override:            0.80,
      write_low_confidence_to_candidates: true,
    }
  }
}

impl Policy {
  /// Resolve each threshold from the first section that sets it, falling
  /// back to `self`.
  ///
  /// Fallback is per field, not per section: a section that sets only
  /// `min_confidence_profile` still lets later sections supply
  /// `min_confidence_override`, rather than shadowing them wholesale.
  pub fn resolve<'a>(
    self,
    sections: impl IntoIterator<Item = Option<&'a PolicySection>> + Clone,
  ) -> Self {
    let pick = |f: fn(&PolicySection) -> Option<f64>| {
      sections.clone().into_iter().flatten().find_map(f)
    };
    Self {
      min_confidence_profile:             pick(|s| s.min_confidence_profile)
        .unwrap_or(self.min_confidence_profile),
      min_confidence_override:            pick(|s| s.min_confidence_override)
        .unwrap_or(self.min_confidence_override),
      write_low_confidence_to_candidates: sections
        .into_iter()
        .flatten()
        .find_map(|s| s.write_low_confidence_to_candidates)
        .unwrap_or(self.write_low_confidence_to_candidates),
    }
  }
}

/// A policy block as it appears in a request (`policy`) or a response
/// (`policy_echo`). Every threshold is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySection {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_confidence_profile:             Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_confidence_override:            Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub write_low_confidence_to_candidates: Option<bool>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub facts_prefix_recommendations:       Vec<String>,
  #[serde(default, skip_serializing_if = "Value::is_null")]
  pub extraction_targets:                 Value,
}

impl From<Policy> for PolicySection {
  fn from(policy: Policy) -> Self {
    Self {
      min_confidence_profile: Some(policy.min_confidence_profile),
      min_confidence_override: Some(policy.min_confidence_override),
      write_low_confidence_to_candidates: Some(
        policy.write_low_confidence_to_candidates,
      ),
      ..Default::default()
    }
  }
}

// ─── Request ────────────────────────────────────────────────────────────────

/// Advisory write scopes for the reasoning step; not enforced on apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WritePaths {
  #[serde(default)]
  pub allowed_write_paths:   Vec<String>,
  #[serde(default)]
  pub forbidden_write_paths: Vec<String>,
}

/// `compile_request.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileRequest {
  pub schema_version:  String,
  pub request_id:      String,
  pub store_root:      String,
  #[serde(default)]
  pub run_id:          Option<String>,
  pub generated_at:    DateTime<Utc>,
  pub policy:          PolicySection,
  #[serde(default)]
  pub inputs:          WritePaths,
  #[serde(default)]
  pub observation_ids: Vec<String>,
  #[serde(default)]
  pub observations:    Vec<Observation>,
  #[serde(default)]
  pub note:            String,
}

// ─── Response ───────────────────────────────────────────────────────────────

/// One entry of `profiles_to_upsert`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpsert {
  #[serde(default)]
  pub model_id: Option<String>,
  #[serde(default)]
  pub rule:     ProfileRule,
  #[serde(flatten)]
  pub extra:    Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceSummary {
  #[serde(default)]
  pub observation_ids_used: Vec<String>,
  #[serde(flatten)]
  pub extra:                Map<String, Value>,
}

/// `compile_response.json`, produced externally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileResponse {
  pub request_id:           String,
  #[serde(default)]
  pub profiles_to_upsert:   Vec<ProfileUpsert>,
  #[serde(default)]
  pub candidates_to_create: Vec<CandidateProposal>,
  #[serde(default)]
  pub overrides_to_upsert:  Vec<OverrideProposal>,
  pub provenance_summary:   ProvenanceSummary,
  #[serde(default)]
  pub policy_echo:          Option<PolicySection>,
}

// ─── Apply ──────────────────────────────────────────────────────────────────

/// Input to [`crate::store::FactStore::compile_apply`].
#[derive(Debug, Clone)]
pub struct ApplyInput {
  pub response:    Value,
  /// Reference to the response recorded in history (usually a file path).
  pub input:       String,
  pub request:     Option<Value>,
  pub request_ref: Option<String>,
}

/// Outcome of a successful apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
  pub request_id:    String,
  pub policy:        Policy,
  /// Every artifact path the transaction wrote or re-confirmed.
  pub changed_paths: Vec<String>,
  /// Ids of candidates created by low-confidence routing.
  pub routed:        Vec<String>,
  /// Writes skipped because the artifact text was already identical.
  pub unchanged:     usize,
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn policy_falls_back_field_by_field() {
    let request = PolicySection {
      min_confidence_profile: Some(0.5),
      ..Default::default()
    };
    let echo = PolicySection {
      min_confidence_profile: Some(0.1),
      min_confidence_override: Some(0.6),
      ..Default::default()
    };
    let policy = Policy::default().resolve([Some(&request), Some(&echo)]);
    assert_eq!(policy.min_confidence_profile, 0.5);
    assert_eq!(policy.min_confidence_override, 0.6);
    assert!(policy.write_low_confidence_to_candidates);
  }

  #[test]
  fn policy_defaults_without_sections() {
    let policy = Policy::default().resolve([None, None]);
    assert_eq!(policy, Policy::default());
  }

  #[test]
  fn response_lists_default_to_empty() {
    let response: CompileResponse = serde_json::from_value(json!({
      "request_id": "r",
      "provenance_summary": { "observation_ids_used": [] },
    }))
    .unwrap();
    assert!(response.profiles_to_upsert.is_empty());
    assert!(response.policy_echo.is_none());
  }

  #[test]
  fn response_requires_provenance_summary() {
    let result =
      serde_json::from_value::<CompileResponse>(json!({ "request_id": "r" }));
    assert!(result.is_err());
  }
}
