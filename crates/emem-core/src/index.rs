//! The derived rule index.
//!
//! The index is a cache of every live profile rule, grouped by model. It is
//! never authoritative and can be rebuilt from the rule files at any time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::version;

/// One indexed rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
  pub rule_id:     String,
  pub fw_range:    String,
  #[serde(default)]
  pub priority:    i64,
  #[serde(default)]
  pub confidence:  Option<f64>,
  #[serde(default)]
  pub specificity: i64,
  /// Rule file path, relative to the store root.
  pub path:        String,
}

impl IndexEntry {
  pub fn matches(&self, fw_version: &str) -> bool {
    version::matches(fw_version, &self.fw_range)
  }
}

/// `data/memory/index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
  pub schema_version: String,
  pub generated_at:   DateTime<Utc>,
  #[serde(default)]
  pub profiles:       BTreeMap<String, Vec<IndexEntry>>,
}

impl Index {
  /// The model's entries matching `fw_version`, most specific first and then
  /// by descending priority.
  pub fn search(&self, model_id: &str, fw_version: &str) -> Vec<IndexEntry> {
    let mut hits: Vec<IndexEntry> = self
      .profiles
      .get(model_id)
      .into_iter()
      .flatten()
      .filter(|e| e.matches(fw_version))
      .cloned()
      .collect();
    hits.sort_by(|a, b| {
      (b.specificity, b.priority).cmp(&(a.specificity, a.priority))
    });
    hits
  }
}
