//! On-disk layout of a store root.
//!
//! ```text
//! data/memory/observations.jsonl                      global observation log
//! data/memory/history.jsonl                           history log
//! data/memory/index.json                              derived rule index
//! data/memory/overrides/<instance>.yaml               live overrides
//! data/memory/revisions/<kind>[/<owner>]/<key>/<rev>.yaml
//! runs/<run_id>/observations.jsonl                    run-scoped logs
//! spec/memory/profiles/<model>/<rule>.yaml            live profile rules
//! spec/memory/candidates/<model>/<candidate>.yaml     staged candidates
//! ```
//!
//! Paths handed back to callers (index entries, history, `changed_paths`) are
//! relative to the root and use `/` separators.

use std::path::{Path, PathBuf};

use emem_core::rule::ArtifactKind;

use crate::{Error, Result};

const DATA: &str = "data/memory";
const SPEC: &str = "spec/memory";
const RUNS: &str = "runs";
const OBSERVATIONS: &str = "observations.jsonl";

/// Resolves every store path from the root.
#[derive(Debug, Clone)]
pub struct Layout {
  root: PathBuf,
}

impl Layout {
  pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

  pub fn root(&self) -> &Path { &self.root }

  /// Absolute path of a root-relative path.
  pub fn absolute(&self, relative: &str) -> PathBuf { self.root.join(relative) }

  // ── Logs ──────────────────────────────────────────────────────────────

  pub fn global_observations(&self) -> PathBuf {
    self.absolute(&format!("{DATA}/{OBSERVATIONS}"))
  }

  pub fn runs_dir(&self) -> PathBuf { self.root.join(RUNS) }

  pub fn run_observations(&self, run_id: &str) -> PathBuf {
    self.runs_dir().join(run_id).join(OBSERVATIONS)
  }

  pub fn history(&self) -> PathBuf { self.absolute(&format!("{DATA}/history.jsonl")) }

  pub fn index(&self) -> PathBuf { self.absolute(&format!("{DATA}/index.json")) }

  // ── Artifacts ─────────────────────────────────────────────────────────

  pub fn profiles_dir(&self) -> PathBuf {
    self.absolute(&Self::kind_dir(ArtifactKind::Profiles))
  }

  /// Root-relative path of a live artifact.
  pub fn artifact_rel(kind: ArtifactKind, owner: Option<&str>, key: &str) -> String {
    match owner {
      Some(owner) if kind != ArtifactKind::Overrides => {
        format!("{}/{owner}/{key}.yaml", Self::kind_dir(kind))
      }
      _ => format!("{}/{key}.yaml", Self::kind_dir(kind)),
    }
  }

  /// Root-relative directory holding one model's profile rules.
  pub fn profile_dir_rel(model_id: &str) -> String {
    format!("{}/{model_id}", Self::kind_dir(ArtifactKind::Profiles))
  }

  pub fn profile_rel(model_id: &str, rule_id: &str) -> String {
    Self::artifact_rel(ArtifactKind::Profiles, Some(model_id), rule_id)
  }

  pub fn override_path(&self, instance_id: &str) -> PathBuf {
    self.absolute(&Self::artifact_rel(ArtifactKind::Overrides, None, instance_id))
  }

  /// Directory holding every snapshot of one artifact.
  pub fn revision_dir(
    &self,
    kind: ArtifactKind,
    owner: Option<&str>,
    key: &str,
  ) -> PathBuf {
    let mut dir = self.absolute(&format!("{DATA}/revisions/{kind}"));
    if let Some(owner) = owner {
      dir.push(owner);
    }
    dir.join(key)
  }

  fn kind_dir(kind: ArtifactKind) -> String {
    match kind {
      ArtifactKind::Profiles | ArtifactKind::Candidates => format!("{SPEC}/{kind}"),
      ArtifactKind::Overrides => format!("{DATA}/{kind}"),
    }
  }
}

/// Reject ids that cannot safely be used as a single path segment.
pub fn check_segment(what: &'static str, value: &str) -> Result<()> {
  let unsafe_segment = value.is_empty()
    || value == "."
    || value == ".."
    || value.contains(['/', '\\', '\0']);
  if unsafe_segment {
    return Err(Error::InvalidKey {
      what,
      value: value.to_owned(),
    });
  }
  Ok(())
}
