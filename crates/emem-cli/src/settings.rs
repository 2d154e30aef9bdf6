//! Layered settings: defaults, then the optional config file, then
//! `EMEM_`-prefixed environment variables.
//!
//! ```toml
//! store_root = "/var/lib/emem"
//! prepare_limit = 200
//!
//! [policy]
//! min_confidence_profile = 0.9
//! ```
//!
//! Top-level keys take a single underscore after the prefix
//! (`EMEM_PREPARE_LIMIT=50`); nested keys use a double underscore, e.g.
//! `EMEM_POLICY__MIN_CONFIDENCE_PROFILE=0.9`.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use emem_core::compile::Policy;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_root:     PathBuf,
  /// Thresholds for prepared requests, and the last fallback on apply.
  pub policy:         Policy,
  pub prepare_limit:  usize,
  pub timeline_limit: usize,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_root:     PathBuf::from("."),
      policy:         Policy::default(),
      prepare_limit:  200,
      timeline_limit: 200,
    }
  }
}

impl Settings {
  /// Load settings; a missing `config_file` is not an error.
  pub fn load(config_file: &Path) -> anyhow::Result<Self> {
    Self::load_with(config_file, environment())
  }

  fn load_with(config_file: &Path, env: config::Environment) -> anyhow::Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(config_file).required(false))
      .add_source(env)
      .build()
      .with_context(|| format!("failed to read config file {}", config_file.display()))?
      .try_deserialize()
      .context("failed to deserialise settings")
  }
}

fn environment() -> config::Environment {
  config::Environment::with_prefix("EMEM")
    .prefix_separator("_")
    .separator("__")
    .try_parsing(true)
}
