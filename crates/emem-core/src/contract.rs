//! Structural contracts for the documents that cross the store boundary.
//!
//! Validation is a pluggable capability: the store only needs something that
//! answers "does this value satisfy contract X". [`StructuralValidator`] is
//! the built-in implementation; it decodes the value into the typed document
//! and then checks the value ranges serde cannot express.

use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::Display;

use crate::{
  Error, Result,
  compile::{CompileRequest, CompileResponse, PolicySection},
  observation::Observation,
};

/// Maximum number of problems quoted in one validation error.
const MAX_REPORTED: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Contract {
  Observation,
  CompileRequest,
  CompileResponse,
}

/// Something that can check a JSON value against a [`Contract`].
pub trait ContractValidator: Send + Sync {
  fn validate(&self, contract: Contract, value: &Value) -> Result<()>;
}

/// Decode `value` as `T`, reporting a failure as a validation error.
pub fn decode<T: DeserializeOwned>(contract: Contract, value: Value) -> Result<T> {
  serde_json::from_value(value).map_err(|e| Error::Validation {
    contract,
    message: e.to_string(),
  })
}

/// Typed decoding plus range checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl ContractValidator for StructuralValidator {
  fn validate(&self, contract: Contract, value: &Value) -> Result<()> {
    let problems = match contract {
      Contract::Observation => {
        observation_problems(&decode(contract, value.clone())?)
      }
      Contract::CompileRequest => {
        request_problems(&decode(contract, value.clone())?)
      }
      Contract::CompileResponse => {
        response_problems(&decode(contract, value.clone())?)
      }
    };
    if problems.is_empty() {
      return Ok(());
    }
    let quoted: Vec<&str> =
      problems.iter().take(MAX_REPORTED).map(String::as_str).collect();
    Err(Error::Validation {
      contract,
      message: quoted.join("; "),
    })
  }
}

fn observation_problems(obs: &Observation) -> Vec<String> {
  let mut problems = Vec::new();
  require_non_empty(&mut problems, "id", &obs.id);
  require_non_empty(&mut problems, "subject.model_id", &obs.subject.model_id);
  require_non_empty(&mut problems, "subject.fw_version", &obs.subject.fw_version);
  problems
}

fn request_problems(request: &CompileRequest) -> Vec<String> {
  let mut problems = Vec::new();
  require_non_empty(&mut problems, "schema_version", &request.schema_version);
  require_non_empty(&mut problems, "request_id", &request.request_id);
  policy_problems(&mut problems, "policy", &request.policy);
  problems
}

fn response_problems(response: &CompileResponse) -> Vec<String> {
  let mut problems = Vec::new();
  require_non_empty(&mut problems, "request_id", &response.request_id);
  for (i, item) in response.profiles_to_upsert.iter().enumerate() {
    require_unit(
      &mut problems,
      &format!("profiles_to_upsert[{i}].rule.confidence"),
      item.rule.confidence,
    );
  }
  for (i, item) in response.candidates_to_create.iter().enumerate() {
    require_unit(
      &mut problems,
      &format!("candidates_to_create[{i}].confidence"),
      item.confidence,
    );
  }
  for (i, item) in response.overrides_to_upsert.iter().enumerate() {
    require_unit(
      &mut problems,
      &format!("overrides_to_upsert[{i}].confidence"),
      item.confidence,
    );
  }
  if let Some(echo) = &response.policy_echo {
    policy_problems(&mut problems, "policy_echo", echo);
  }
  problems
}

fn policy_problems(problems: &mut Vec<String>, at: &str, policy: &PolicySection) {
  require_unit(
    problems,
    &format!("{at}.min_confidence_profile"),
    policy.min_confidence_profile,
  );
  require_unit(
    problems,
    &format!("{at}.min_confidence_override"),
    policy.min_confidence_override,
  );
}

fn require_non_empty(problems: &mut Vec<String>, field: &str, value: &str) {
  if value.trim().is_empty() {
    problems.push(format!("{field} must not be empty"));
  }
}

fn require_unit(problems: &mut Vec<String>, field: &str, value: Option<f64>) {
  if let Some(v) = value
    && !(0.0..=1.0).contains(&v)
  {
    problems.push(format!("{field} must be within [0, 1], got {v}"));
  }
}
