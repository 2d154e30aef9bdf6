//! `FsStore`: the filesystem implementation of [`FactStore`].

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use emem_core::{
  compile::{ApplyInput, ApplyReport, CompileRequest, Policy},
  contract::{ContractValidator, StructuralValidator},
  index::IndexEntry,
  observation::{NewObservation, Observation},
  resolution::{Resolution, TimelineEntry, TimelineQuery},
  store::FactStore,
};
use serde_json::Value;
use tracing::info;

use crate::{
  Error, Layout, Result,
  compile::CompileTransaction,
  files::{read_opt, write},
  index::RuleIndex,
  layout::check_segment,
  observe::ObservationLog,
  resolve::Resolver,
  revision::{ArtifactRef, RevisionStore},
  timeline,
};

/// A handle on one store root. Holds no state besides the root, the policy
/// defaults, and the validator; every call goes back to the disk.
#[derive(Clone)]
pub struct FsStore {
  layout:    Layout,
  policy:    Policy,
  validator: Arc<dyn ContractValidator>,
}

impl std::fmt::Debug for FsStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FsStore")
      .field("root", &self.layout.root())
      .field("policy", &self.policy)
      .finish_non_exhaustive()
  }
}

impl FsStore {
  /// Open the store rooted at `root`. Nothing is created until the first
  /// write.
  pub fn open(root: impl AsRef<Path>) -> Result<Self> {
    let root = root.as_ref();
    let root = std::path::absolute(root).map_err(Error::io(root))?;
    Ok(Self {
      layout:    Layout::new(root),
      policy:    Policy::default(),
      validator: Arc::new(StructuralValidator),
    })
  }

  /// Default thresholds for prepared requests and the last fallback of
  /// apply.
  pub fn with_policy(mut self, policy: Policy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_validator(mut self, validator: Arc<dyn ContractValidator>) -> Self {
    self.validator = validator;
    self
  }

  pub fn root(&self) -> &Path { self.layout.root() }

  pub fn layout(&self) -> &Layout { &self.layout }

  pub fn revisions(&self) -> RevisionStore<'_> { RevisionStore::new(&self.layout) }

  pub fn index(&self) -> RuleIndex<'_> { RuleIndex::new(&self.layout) }

  fn transaction(&self) -> CompileTransaction<'_> {
    CompileTransaction::new(&self.layout, self.validator.as_ref(), self.policy)
  }

  /// Prepare a compile request and write it as pretty JSON to `out`.
  pub fn compile_prepare_to(
    &self,
    run_id: Option<&str>,
    limit: usize,
    out: &Path,
  ) -> Result<CompileRequest> {
    let request = self.transaction().prepare(run_id, limit)?;
    write(out, &serde_json::to_string_pretty(&request)?)?;
    info!(path = %out.display(), "compile request written");
    Ok(request)
  }

  /// Apply a compile response read from `input`, bound to the request read
  /// from `request` when given. History records both absolute paths.
  pub fn compile_apply_files(
    &self,
    input: &Path,
    request: Option<&Path>,
  ) -> Result<ApplyReport> {
    let read_json = |path: &Path| -> Result<(Value, PathBuf)> {
      let text = read_opt(path)?.ok_or_else(|| {
        Error::io(path)(std::io::Error::from(std::io::ErrorKind::NotFound))
      })?;
      let absolute = std::path::absolute(path).map_err(Error::io(path))?;
      Ok((serde_json::from_str(&text)?, absolute))
    };

    let (response, input) = read_json(input)?;
    let request = request.map(read_json).transpose()?;
    let (request, request_ref) = match request {
      Some((value, path)) => (Some(value), Some(path.display().to_string())),
      None => (None, None),
    };
    self.compile_apply(ApplyInput {
      response,
      input: input.display().to_string(),
      request,
      request_ref,
    })
  }
}

impl FactStore for FsStore {
  type Error = Error;

  fn observe(&self, input: NewObservation) -> Result<Observation> {
    ObservationLog::new(&self.layout).append(self.validator.as_ref(), input)
  }

  fn compile_prepare(&self, run_id: Option<&str>, limit: usize) -> Result<CompileRequest> {
    self.transaction().prepare(run_id, limit)
  }

  fn compile_apply(&self, input: ApplyInput) -> Result<ApplyReport> {
    self.transaction().apply(input)
  }

  fn search(&self, model_id: &str, fw_version: &str) -> Result<Vec<IndexEntry>> {
    Resolver::new(&self.layout).search(model_id, fw_version)
  }

  fn show(&self, model_id: &str, rule_id: &str) -> Result<String> {
    check_segment("model_id", model_id)?;
    check_segment("rule id", rule_id)?;
    let path = self.layout.absolute(&Layout::profile_rel(model_id, rule_id));
    read_opt(&path)?.ok_or_else(|| Error::RuleNotFound {
      model_id: model_id.to_owned(),
      rule_id:  rule_id.to_owned(),
    })
  }

  fn resolve(
    &self,
    model_id: &str,
    fw_version: &str,
    instance_id: Option<&str>,
  ) -> Result<Resolution> {
    Resolver::new(&self.layout).resolve(model_id, fw_version, instance_id)
  }

  fn timeline(&self, query: &TimelineQuery) -> Result<Vec<TimelineEntry>> {
    timeline::timeline(&self.layout, query)
  }

  fn diff(
    &self,
    model_id: &str,
    rule_id: &str,
    rev_from: &str,
    rev_to: &str,
  ) -> Result<String> {
    check_segment("model_id", model_id)?;
    check_segment("rule id", rule_id)?;
    self
      .revisions()
      .diff(ArtifactRef::profile(model_id, rule_id), rev_from, rev_to)
  }
}
