//! Error type for `emem-store-fs`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] emem_core::Error),

  #[error("i/o error at {}: {source}", .path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("yaml error: {0}")]
  Yaml(#[from] serde_yaml_bw::Error),

  /// A proposal lacks an attribute the transaction requires.
  #[error("{context}: missing required field `{field}`")]
  MissingField {
    context: String,
    field:   &'static str,
  },

  /// An id that would be used as a path segment is unsafe.
  #[error("invalid {what}: {value:?}")]
  InvalidKey { what: &'static str, value: String },

  /// Provenance cites observations that are in no log. At most five ids are
  /// quoted.
  #[error("{context}: provenance references unknown observation ids: {missing:?}")]
  UnknownObservations {
    context: String,
    missing: Vec<String>,
  },

  #[error(
    "provenance_summary.observation_ids_used is missing ids referenced by \
     proposals: {missing:?}"
  )]
  IncompleteProvenanceSummary { missing: Vec<String> },

  #[error(
    "compile_response.request_id {response:?} does not match \
     compile_request.request_id {request:?}"
  )]
  RequestMismatch { response: String, request: String },

  #[error("rule not found: {model_id}/{rule_id}")]
  RuleNotFound { model_id: String, rule_id: String },

  #[error("revision {rev} not found for {key}")]
  RevisionNotFound { key: String, rev: String },
}

impl Error {
  pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
    let path = path.into();
    move |source| Self::Io { path, source }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
