//! Full-rescan builder for the derived rule index.

use std::collections::BTreeMap;

use chrono::Utc;
use emem_core::{
  SCHEMA_VERSION,
  index::{Index, IndexEntry},
  rule::ProfileRule,
  version,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
  Layout, Result,
  files::{files_with_ext, read_opt, subdirs, write},
};

/// The part of a rule file the index needs. Files missing the other
/// attributes still index.
#[derive(Deserialize)]
struct RuleFile {
  #[serde(default)]
  rules: Vec<ProfileRule>,
}

/// Read the rules of one profile-rule file.
pub(crate) fn read_rules(text: &str) -> Result<Vec<ProfileRule>> {
  Ok(serde_yaml_bw::from_str::<Option<RuleFile>>(text)?.map_or_else(Vec::new, |f| f.rules))
}

pub struct RuleIndex<'a> {
  layout: &'a Layout,
}

impl<'a> RuleIndex<'a> {
  pub fn new(layout: &'a Layout) -> Self { Self { layout } }

  /// Rescan every profile-rule file and rewrite the index.
  ///
  /// A rule without an id is indexed under its file stem; one without a
  /// range under `*`. Unreadable files are skipped with a warning.
  pub fn rebuild(&self) -> Result<Index> {
    let mut profiles = BTreeMap::new();

    for model_dir in subdirs(&self.layout.profiles_dir())? {
      let Some(model_id) = model_dir.file_name().and_then(|n| n.to_str()) else {
        continue;
      };
      let mut entries = Vec::new();

      for file in files_with_ext(&model_dir, "yaml")? {
        let Some(stem) = file.file_stem().and_then(|s| s.to_str()) else {
          continue;
        };
        let Some(text) = read_opt(&file)? else {
          continue;
        };
        let rules = match read_rules(&text) {
          Ok(rules) => rules,
          Err(e) => {
            warn!(path = %file.display(), error = %e, "skipping unreadable rule file");
            continue;
          }
        };
        let path = format!("{}/{stem}.yaml", Layout::profile_dir_rel(model_id));
        for rule in rules {
          let fw_range = rule.fw_range.unwrap_or_else(|| "*".to_owned());
          entries.push(IndexEntry {
            rule_id: rule.id.unwrap_or_else(|| stem.to_owned()),
            specificity: version::specificity(&fw_range),
            fw_range,
            priority: rule.priority.unwrap_or(0),
            confidence: rule.confidence,
            path: path.clone(),
          });
        }
      }
      profiles.insert(model_id.to_owned(), entries);
    }

    let index = Index {
      schema_version: SCHEMA_VERSION.to_owned(),
      generated_at: Utc::now(),
      profiles,
    };
    write(&self.layout.index(), &serde_json::to_string_pretty(&index)?)?;
    info!(
      models = index.profiles.len(),
      rules = index.profiles.values().map(Vec::len).sum::<usize>(),
      "rule index rebuilt"
    );
    Ok(index)
  }

  /// The persisted index. When it is absent it is rebuilt first if
  /// `rebuild_if_missing`, otherwise an empty index is returned.
  pub fn load(&self, rebuild_if_missing: bool) -> Result<Index> {
    match read_opt(&self.layout.index())? {
      Some(text) => Ok(serde_json::from_str(&text)?),
      None if rebuild_if_missing => self.rebuild(),
      None => Ok(Index {
        schema_version: SCHEMA_VERSION.to_owned(),
        generated_at:   Utc::now(),
        profiles:       BTreeMap::new(),
      }),
    }
  }
}
