//! Content-addressed revisions of live artifacts.
//!
//! Every write of a profile rule, candidate, or override goes through
//! [`RevisionStore::upsert`]. Both the replaced text and the new text are
//! kept as write-once snapshots named by their content hash, and the write is
//! recorded in the history log, so any artifact's full history can be
//! reconstructed and diffed.
//!
//! Revision names are the first 12 hex characters of a SHA-256 digest.
//! Collisions are not detected: two different texts sharing a 12-character
//! prefix would share a snapshot file, and the second would never be stored.
//! At the number of revisions a single artifact accumulates the odds are
//! negligible.

use chrono::Utc;
use emem_core::{
  history::{ArtifactEvent, HistoryEvent},
  rule::ArtifactKind,
};
use sha2::{Digest, Sha256};
use similar::TextDiff;
use tracing::debug;

use crate::{
  Error, Layout, Result,
  files::{self, append_jsonl, read_opt, write, write_once},
};

/// Length of a revision name in hex characters.
pub const REV_LEN: usize = 12;

const SNAPSHOT_EXT: &str = "yaml";

/// Content hash naming a revision of `text`.
pub fn content_hash(text: &str) -> String {
  let digest = Sha256::digest(text.as_bytes());
  let mut hex = hex::encode(digest);
  hex.truncate(REV_LEN);
  hex
}

/// Identifies one artifact: `(kind, owner, key)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactRef<'a> {
  pub kind:  ArtifactKind,
  /// Model id for profiles and candidates; overrides have none.
  pub owner: Option<&'a str>,
  pub key:   &'a str,
}

impl<'a> ArtifactRef<'a> {
  pub fn profile(model_id: &'a str, rule_id: &'a str) -> Self {
    Self {
      kind:  ArtifactKind::Profiles,
      owner: Some(model_id),
      key:   rule_id,
    }
  }

  pub fn candidate(model_id: &'a str, candidate_id: &'a str) -> Self {
    Self {
      kind:  ArtifactKind::Candidates,
      owner: Some(model_id),
      key:   candidate_id,
    }
  }

  pub fn instance_override(instance_id: &'a str) -> Self {
    Self {
      kind:  ArtifactKind::Overrides,
      owner: None,
      key:   instance_id,
    }
  }

  /// Root-relative path of the live file.
  pub fn live_path(&self) -> String {
    Layout::artifact_rel(self.kind, self.owner, self.key)
  }
}

/// Result of an [`RevisionStore::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upsert {
  /// Root-relative path of the live file.
  pub path:     String,
  pub from_rev: Option<String>,
  pub to_rev:   String,
  /// `false` when the live text was already identical and nothing happened.
  pub changed:  bool,
}

/// Snapshotting writer over a store [`Layout`].
pub struct RevisionStore<'a> {
  layout: &'a Layout,
}

impl<'a> RevisionStore<'a> {
  pub fn new(layout: &'a Layout) -> Self { Self { layout } }

  /// Replace the live text of `artifact` with `new_text`.
  ///
  /// Identical text is a no-op: no snapshot, no history event. Otherwise the
  /// previous and new texts are snapshotted (if not already present), the live
  /// file is overwritten, and one history event is appended.
  pub fn upsert(&self, artifact: ArtifactRef<'_>, new_text: &str) -> Result<Upsert> {
    let path = artifact.live_path();
    let live = self.layout.absolute(&path);
    let current = read_opt(&live)?;
    let to_rev = content_hash(new_text);
    let from_rev = current.as_deref().map(content_hash);

    if current.as_deref() == Some(new_text) {
      debug!(%path, rev = %to_rev, "artifact unchanged");
      return Ok(Upsert {
        path,
        from_rev,
        to_rev,
        changed: false,
      });
    }

    let dir = self
      .layout
      .revision_dir(artifact.kind, artifact.owner, artifact.key);
    if let (Some(text), Some(rev)) = (&current, &from_rev) {
      write_once(&dir.join(format!("{rev}.{SNAPSHOT_EXT}")), text)?;
    }
    write_once(&dir.join(format!("{to_rev}.{SNAPSHOT_EXT}")), new_text)?;
    write(&live, new_text)?;

    append_jsonl(
      &self.layout.history(),
      &HistoryEvent::Artifact(ArtifactEvent {
        ts:       Utc::now(),
        kind:     artifact.kind.upsert_event(),
        model_id: artifact.owner.map(str::to_owned),
        key:      artifact.key.to_owned(),
        path:     path.clone(),
        from_rev: from_rev.clone(),
        to_rev:   to_rev.clone(),
      }),
    )?;
    debug!(%path, from = ?from_rev, to = %to_rev, "artifact written");

    Ok(Upsert {
      path,
      from_rev,
      to_rev,
      changed: true,
    })
  }

  /// The text stored under revision `rev` of `artifact`.
  pub fn read(&self, artifact: ArtifactRef<'_>, rev: &str) -> Result<String> {
    let not_found = || Error::RevisionNotFound {
      key: artifact.live_path(),
      rev: rev.to_owned(),
    };
    if rev.is_empty() || !rev.chars().all(|c| c.is_ascii_hexdigit()) {
      return Err(not_found());
    }
    let path = self
      .layout
      .revision_dir(artifact.kind, artifact.owner, artifact.key)
      .join(format!("{rev}.{SNAPSHOT_EXT}"));
    read_opt(&path)?.ok_or_else(not_found)
  }

  /// Names of every stored revision of `artifact`, sorted.
  pub fn list(&self, artifact: ArtifactRef<'_>) -> Result<Vec<String>> {
    let dir = self
      .layout
      .revision_dir(artifact.kind, artifact.owner, artifact.key);
    Ok(
      files::files_with_ext(&dir, SNAPSHOT_EXT)?
        .iter()
        .filter_map(|p| p.file_stem()?.to_str().map(str::to_owned))
        .collect(),
    )
  }

  /// Unified line diff from revision `rev_from` to `rev_to`; empty when the
  /// texts are identical.
  pub fn diff(
    &self,
    artifact: ArtifactRef<'_>,
    rev_from: &str,
    rev_to: &str,
  ) -> Result<String> {
    let old = self.read(artifact, rev_from)?;
    let new = self.read(artifact, rev_to)?;
    let diff = TextDiff::from_lines(&old, &new);
    Ok(
      diff
        .unified_diff()
        .context_radius(3)
        .header(rev_from, rev_to)
        .to_string(),
    )
  }
}
