//! Compile requests and the compile transaction.
//!
//! [`CompileTransaction::apply`] runs in two phases. The planning phase
//! validates the response, binds it to its request, checks every proposal's
//! required fields and provenance, and the provenance summary, without
//! touching the disk. Only a fully valid plan reaches the write phase, where
//! every accepted item goes through the [`RevisionStore`]. A validation
//! failure therefore writes nothing. An I/O failure part-way through the write
//! phase still leaves the earlier writes in place; `changed_paths` in the
//! history log only covers transactions that completed.

use std::collections::{BTreeSet, HashSet};

use chrono::{SecondsFormat, Utc};
use emem_core::{
  SCHEMA_VERSION,
  compile::{
    ApplyInput, ApplyReport, CompileRequest, CompileResponse, Policy,
    PolicySection, WritePaths,
  },
  contract::{Contract, ContractValidator, decode},
  history::{ApplySummary, COMPILE_APPLY, HistoryEvent},
  rule::{
    CandidateDoc, OverrideDoc, OverrideProposal, ProfileRule, ProfileRuleDoc,
    Provenance, RoutedCandidate, stamped,
  },
};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Error, Layout, Result,
  files::append_jsonl,
  index::RuleIndex,
  layout::check_segment,
  observe::ObservationLog,
  revision::{ArtifactRef, RevisionStore},
};

/// Model bucket for overrides routed to candidates; overrides have no model.
pub const OVERRIDE_BUCKET: &str = "instance_overrides";
const UNKNOWN_MODEL: &str = "unknown_model";
const UNKNOWN_INSTANCE: &str = "unknown_instance";
/// Unknown ids quoted in a provenance error.
const MAX_QUOTED_IDS: usize = 5;

const NOTE: &str = "Host LLM must output a STRICT JSON compile_response.json \
                    only (no prose). Use policy.extraction_targets as \
                    guidance; include provenance.observation_ids for every \
                    proposed item.";

// ─── Request preparation ────────────────────────────────────────────────────

fn request_policy(policy: Policy) -> PolicySection {
  PolicySection {
    facts_prefix_recommendations: [
      "facts.transport.*",
      "facts.procedure.*",
      "facts.analysis.*",
      "facts.known_issues.*",
      "facts.calibration.*",
    ]
    .map(str::to_owned)
    .to_vec(),
    extraction_targets: json!({
      "analysis": {
        "default_templates_key": "facts.analysis.default_templates",
        "allowed_templates": ["eda", "cleaning", "metrics", "anomaly", "viz", "full"],
        "instructions": "If evidence suggests a default analysis workflow for \
                         this model+fw, write facts.analysis.default_templates \
                         as an ordered list of template keys (first is \
                         preferred).",
      }
    }),
    ..PolicySection::from(policy)
  }
}

fn write_paths() -> WritePaths {
  WritePaths {
    allowed_write_paths:   ["spec/memory/profiles/", "spec/memory/candidates/", "data/memory/overrides/"]
      .map(str::to_owned)
      .to_vec(),
    forbidden_write_paths: [".git/", ".github/", "src/", "schemas/"]
      .map(str::to_owned)
      .to_vec(),
  }
}

// ─── Plan ───────────────────────────────────────────────────────────────────

/// One accepted write, in the order it will be performed.
#[derive(Debug)]
enum PlannedWrite {
  Profile {
    model_id: String,
    rule_id:  String,
    rule:     ProfileRule,
  },
  Candidate {
    model_id:     String,
    candidate_id: String,
    body:         Value,
    routed:       bool,
  },
  Override {
    instance_id: String,
    body:        OverrideProposal,
  },
}

/// Everything the write phase needs, produced without touching the disk.
#[derive(Debug)]
struct Plan {
  request_id: String,
  policy:     Policy,
  writes:     Vec<PlannedWrite>,
}

/// Tracks provenance while planning.
struct ProvenanceCheck {
  available: HashSet<String>,
  used:      BTreeSet<String>,
}

impl ProvenanceCheck {
  fn require(&mut self, context: impl FnOnce() -> String, ids: &[String]) -> Result<()> {
    let missing: Vec<String> = ids
      .iter()
      .filter(|id| !self.available.contains(*id))
      .take(MAX_QUOTED_IDS)
      .cloned()
      .collect();
    if !missing.is_empty() {
      return Err(Error::UnknownObservations {
        context: context(),
        missing,
      });
    }
    self.used.extend(ids.iter().cloned());
    Ok(())
  }
}

fn required(
  value: Option<&str>,
  context: impl FnOnce() -> String,
  field: &'static str,
) -> Result<String> {
  match value {
    Some(v) if !v.is_empty() => Ok(v.to_owned()),
    _ => Err(Error::MissingField {
      context: context(),
      field,
    }),
  }
}

fn routed(
  model_id: &str,
  candidate_id: String,
  confidence: f64,
  provenance: &Provenance,
  proposal: Value,
  threshold: f64,
) -> Result<PlannedWrite> {
  let candidate = RoutedCandidate {
    id: candidate_id.clone(),
    model_id: model_id.to_owned(),
    confidence,
    provenance: provenance.clone(),
    proposal,
    reason: format!("confidence<{threshold:?}"),
  };
  Ok(PlannedWrite::Candidate {
    model_id: model_id.to_owned(),
    candidate_id,
    body: serde_json::to_value(candidate)?,
    routed: true,
  })
}

// ─── Transaction ────────────────────────────────────────────────────────────

pub struct CompileTransaction<'a> {
  layout:    &'a Layout,
  validator: &'a dyn ContractValidator,
  defaults:  Policy,
}

impl<'a> CompileTransaction<'a> {
  pub fn new(
    layout: &'a Layout,
    validator: &'a dyn ContractValidator,
    defaults: Policy,
  ) -> Self {
    Self {
      layout,
      validator,
      defaults,
    }
  }

  /// Build a compile request over the most recent `limit` observations.
  pub fn prepare(&self, run_id: Option<&str>, limit: usize) -> Result<CompileRequest> {
    let observations = ObservationLog::new(self.layout).window(run_id, limit)?;
    let request = CompileRequest {
      schema_version:  SCHEMA_VERSION.to_owned(),
      request_id:      Uuid::new_v4().to_string(),
      store_root:      self.layout.root().display().to_string(),
      run_id:          run_id.map(str::to_owned),
      generated_at:    Utc::now(),
      policy:          request_policy(self.defaults),
      inputs:          write_paths(),
      observation_ids: observations.iter().map(|o| o.id.clone()).collect(),
      observations,
      note:            NOTE.to_owned(),
    };
    self
      .validator
      .validate(Contract::CompileRequest, &serde_json::to_value(&request)?)?;
    info!(
      request_id = %request.request_id,
      observations = request.observations.len(),
      "compile request prepared"
    );
    Ok(request)
  }

  /// Validate and apply a compile response.
  pub fn apply(&self, input: ApplyInput) -> Result<ApplyReport> {
    let ApplyInput {
      response,
      input,
      request,
      request_ref,
    } = input;
    let plan = self.plan(response, request)?;
    let report = self.execute(plan)?;

    RuleIndex::new(self.layout).rebuild()?;
    append_jsonl(
      &self.layout.history(),
      &HistoryEvent::Apply(ApplySummary {
        ts: Utc::now(),
        kind: COMPILE_APPLY.to_owned(),
        input,
        request: request_ref,
        request_id: report.request_id.clone(),
        changed_paths: report.changed_paths.clone(),
      }),
    )?;
    info!(
      request_id = %report.request_id,
      paths = report.changed_paths.len(),
      routed = report.routed.len(),
      unchanged = report.unchanged,
      "compile response applied"
    );
    Ok(report)
  }

  fn plan(&self, response: Value, request: Option<Value>) -> Result<Plan> {
    self.validator.validate(Contract::CompileResponse, &response)?;
    let response: CompileResponse = decode(Contract::CompileResponse, response)?;

    let request: Option<CompileRequest> = match request {
      Some(value) => {
        self.validator.validate(Contract::CompileRequest, &value)?;
        let request: CompileRequest = decode(Contract::CompileRequest, value)?;
        if request.request_id != response.request_id {
          return Err(Error::RequestMismatch {
            response: response.request_id,
            request:  request.request_id,
          });
        }
        Some(request)
      }
      None => None,
    };

    let policy = self.defaults.resolve([
      request.as_ref().map(|r| &r.policy),
      response.policy_echo.as_ref(),
    ]);
    let mut provenance = ProvenanceCheck {
      available: ObservationLog::new(self.layout).available_ids()?,
      used:      BTreeSet::new(),
    };
    let mut writes = Vec::new();
    let mut routed_writes = Vec::new();

    for (i, item) in response.profiles_to_upsert.into_iter().enumerate() {
      let at = || format!("profiles_to_upsert[{i}]");
      let model_id = required(item.model_id.as_deref(), at, "model_id")?;
      let rule_id = required(item.rule.id.as_deref(), at, "rule.id")?;
      required(item.rule.fw_range.as_deref(), at, "rule.fw_range")?;
      let confidence = item.rule.confidence.ok_or_else(|| Error::MissingField {
        context: at(),
        field:   "rule.confidence",
      })?;
      check_segment("model_id", &model_id)?;
      check_segment("rule id", &rule_id)?;
      provenance.require(
        || format!("profile rule {model_id}/{rule_id}"),
        &item.rule.provenance.observation_ids,
      )?;

      if confidence < policy.min_confidence_profile
        && policy.write_low_confidence_to_candidates
      {
        routed_writes.push(routed(
          &model_id,
          format!("profile::{rule_id}"),
          confidence,
          &item.rule.provenance,
          serde_json::to_value(&item.rule)?,
          policy.min_confidence_profile,
        )?);
        continue;
      }
      writes.push(PlannedWrite::Profile {
        model_id,
        rule_id,
        rule: item.rule,
      });
    }

    for mut item in response.candidates_to_create {
      let model_id = item
        .model_id
        .get_or_insert_with(|| UNKNOWN_MODEL.to_owned())
        .clone();
      let candidate_id = item
        .id
        .get_or_insert_with(|| Uuid::new_v4().to_string())
        .clone();
      check_segment("model_id", &model_id)?;
      check_segment("candidate id", &candidate_id)?;
      provenance.require(
        || format!("candidate {model_id}/{candidate_id}"),
        &item.provenance.observation_ids,
      )?;
      writes.push(PlannedWrite::Candidate {
        model_id,
        candidate_id,
        body: serde_json::to_value(&item)?,
        routed: false,
      });
    }

    for item in response.overrides_to_upsert {
      let instance_id = item
        .instance_id
        .clone()
        .unwrap_or_else(|| UNKNOWN_INSTANCE.to_owned());
      check_segment("instance_id", &instance_id)?;
      provenance.require(
        || format!("override {instance_id}"),
        &item.provenance.observation_ids,
      )?;

      let confidence = item.confidence.unwrap_or(0.0);
      if confidence < policy.min_confidence_override
        && policy.write_low_confidence_to_candidates
      {
        routed_writes.push(routed(
          OVERRIDE_BUCKET,
          format!("override::{instance_id}"),
          confidence,
          &item.provenance,
          serde_json::to_value(&item)?,
          policy.min_confidence_override,
        )?);
        continue;
      }
      writes.push(PlannedWrite::Override {
        instance_id,
        body: item,
      });
    }

    let summary: HashSet<&String> =
      response.provenance_summary.observation_ids_used.iter().collect();
    provenance.require(
      || "provenance_summary".to_owned(),
      &response.provenance_summary.observation_ids_used,
    )?;
    let uncovered: Vec<String> = provenance
      .used
      .iter()
      .filter(|id| !summary.contains(id))
      .cloned()
      .collect();
    if !uncovered.is_empty() {
      return Err(Error::IncompleteProvenanceSummary { missing: uncovered });
    }

    writes.append(&mut routed_writes);
    Ok(Plan {
      request_id: response.request_id,
      policy,
      writes,
    })
  }

  fn execute(&self, plan: Plan) -> Result<ApplyReport> {
    let revisions = RevisionStore::new(self.layout);
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let mut report = ApplyReport {
      request_id: plan.request_id,
      policy: plan.policy,
      ..Default::default()
    };

    for write in plan.writes {
      let (artifact, text) = match &write {
        PlannedWrite::Profile {
          model_id,
          rule_id,
          rule,
        } => {
          let rule = ProfileRule {
            updated_at: Some(now.clone()),
            ..rule.clone()
          };
          let doc = ProfileRuleDoc::single(model_id, rule);
          (
            ArtifactRef::profile(model_id, rule_id),
            serde_yaml_bw::to_string(&doc)?,
          )
        }
        PlannedWrite::Candidate {
          model_id,
          candidate_id,
          body,
          routed,
        } => {
          if *routed {
            report.routed.push(candidate_id.clone());
          }
          let doc = CandidateDoc {
            schema_version: SCHEMA_VERSION.to_owned(),
            model_id:       model_id.clone(),
            candidate:      stamped(body, &now)?,
          };
          (
            ArtifactRef::candidate(model_id, candidate_id),
            serde_yaml_bw::to_string(&doc)?,
          )
        }
        PlannedWrite::Override { instance_id, body } => {
          let doc = OverrideDoc {
            schema_version: SCHEMA_VERSION.to_owned(),
            instance_id:    instance_id.clone(),
            body:           stamped(body, &now)?,
          };
          (
            ArtifactRef::instance_override(instance_id),
            serde_yaml_bw::to_string(&doc)?,
          )
        }
      };

      let upsert = revisions.upsert(artifact, &text)?;
      if !upsert.changed {
        report.unchanged += 1;
      }
      debug!(path = %upsert.path, changed = upsert.changed, "planned write done");
      report.changed_paths.push(upsert.path);
    }
    Ok(report)
  }
}
