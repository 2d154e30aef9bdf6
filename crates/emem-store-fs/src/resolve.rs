//! Rule lookup and fact resolution.
//!
//! Matching rules are folded from the least specific to the most specific,
//! so the most specific rule wins any leaf they both set. `matched_rules` is
//! still reported most specific first, in search order.

use emem_core::{
  SCHEMA_VERSION,
  index::IndexEntry,
  merge,
  resolution::{EffectiveProfile, MatchedRule, Resolution},
  rule::OverrideDoc,
  version::Version,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
  Layout, Result,
  files::read_opt,
  index::{RuleIndex, read_rules},
  layout::check_segment,
};

pub struct Resolver<'a> {
  layout: &'a Layout,
}

impl<'a> Resolver<'a> {
  pub fn new(layout: &'a Layout) -> Self { Self { layout } }

  /// Indexed rules for `model_id` whose range contains `fw_version`, most
  /// specific first. A missing index is rebuilt.
  pub fn search(&self, model_id: &str, fw_version: &str) -> Result<Vec<IndexEntry>> {
    Version::parse(fw_version)?;
    Ok(RuleIndex::new(self.layout).load(true)?.search(model_id, fw_version))
  }

  pub fn resolve(
    &self,
    model_id: &str,
    fw_version: &str,
    instance_id: Option<&str>,
  ) -> Result<Resolution> {
    let hits = self.search(model_id, fw_version)?;

    let mut layers = Vec::with_capacity(hits.len() + 1);
    let mut matched_rules = Vec::with_capacity(hits.len());
    for hit in &hits {
      let Some(facts) = self.rule_facts(hit)? else {
        continue;
      };
      layers.push(facts);
      matched_rules.push(MatchedRule::from(hit));
    }
    layers.reverse();

    let mut applied_override = None;
    if let Some(instance_id) = instance_id
      && let Some(facts) = self.override_facts(instance_id)?
    {
      layers.push(facts);
      applied_override = Some(instance_id.to_owned());
    }

    let facts = merge::fold(&layers);
    debug!(
      model_id,
      fw_version,
      rules = matched_rules.len(),
      overridden = applied_override.is_some(),
      "profile resolved"
    );
    Ok(Resolution {
      schema_version: SCHEMA_VERSION.to_owned(),
      model_id: model_id.to_owned(),
      fw_version: fw_version.to_owned(),
      instance_id: instance_id.map(str::to_owned),
      effective_profile: EffectiveProfile {
        facts,
        matched_rules,
        applied_override,
      },
    })
  }

  /// The `facts` mapping of an indexed rule. `None` when the index is stale
  /// and the file is gone.
  fn rule_facts(&self, entry: &IndexEntry) -> Result<Option<Value>> {
    let Some(text) = read_opt(&self.layout.absolute(&entry.path))? else {
      warn!(path = %entry.path, rule_id = %entry.rule_id, "indexed rule file is missing");
      return Ok(None);
    };
    let rules = read_rules(&text)?;
    let facts = rules
      .iter()
      .find(|r| r.id.as_deref() == Some(entry.rule_id.as_str()))
      .or_else(|| rules.first())
      .map(|r| &r.facts)
      .filter(|f| f.is_object())
      .cloned()
      .unwrap_or_else(|| Value::Object(Default::default()));
    Ok(Some(facts))
  }

  /// The `facts` mapping of a live instance override, if there is one.
  fn override_facts(&self, instance_id: &str) -> Result<Option<Value>> {
    check_segment("instance_id", instance_id)?;
    let Some(text) = read_opt(&self.layout.override_path(instance_id))? else {
      return Ok(None);
    };
    let doc: OverrideDoc = serde_yaml_bw::from_str(&text)?;
    Ok(doc.body.get("facts").filter(|f| f.is_object()).cloned())
  }
}
