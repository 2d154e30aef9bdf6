//! Error types for `emem-core`.

use thiserror::Error;

use crate::contract::Contract;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid version: {0:?}")]
  InvalidVersion(String),

  #[error("unrecognised fw_range expression: {0:?}")]
  InvalidRange(String),

  #[error("contract validation failed ({contract}): {message}")]
  Validation { contract: Contract, message: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
