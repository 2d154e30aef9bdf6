//! Integration tests for `FsStore` against a temporary store root.

use emem_core::{
  compile::{ApplyInput, ApplyReport},
  history::HistoryEvent,
  observation::{NewObservation, ObservationSource, ObservationSubject},
  resolution::{TimelineKind, TimelineQuery},
  rule::{CandidateDoc, OverrideDoc},
  store::FactStore,
};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::{Error, FsStore, Layout, files::read_jsonl, revision::content_hash};

fn store() -> (TempDir, FsStore) {
  let dir = TempDir::new().expect("tempdir");
  let store = FsStore::open(dir.path()).expect("open store");
  (dir, store)
}

fn observe(s: &FsStore, model_id: &str, fw_version: &str) -> String {
  s.observe(NewObservation {
    run_id:  None,
    subject: ObservationSubject {
      model_id:    model_id.into(),
      fw_version:  fw_version.into(),
      instance_id: None,
    },
    source:  ObservationSource::Chat,
    content: format!("{model_id} on {fw_version} needs a longer settle time"),
  })
  .unwrap()
  .id
}

fn profile(model_id: &str, rule_id: &str, fw_range: &str, confidence: f64, facts: Value, obs: &str) -> Value {
  json!({
    "model_id": model_id,
    "rule": {
      "id": rule_id,
      "fw_range": fw_range,
      "confidence": confidence,
      "provenance": { "observation_ids": [obs] },
      "facts": facts,
    },
  })
}

fn response(profiles: Vec<Value>, used: &[&str]) -> Value {
  json!({
    "request_id": "req-1",
    "profiles_to_upsert": profiles,
    "provenance_summary": { "observation_ids_used": used },
  })
}

fn apply(s: &FsStore, response: Value) -> crate::Result<ApplyReport> {
  s.compile_apply(ApplyInput {
    response,
    input: "compile_response.json".into(),
    request: None,
    request_ref: None,
  })
}

fn exists(s: &FsStore, rel: &str) -> bool { s.layout().absolute(rel).exists() }

fn history(s: &FsStore) -> Vec<HistoryEvent> {
  read_jsonl(&s.layout().history()).unwrap()
}

// ─── End to end ─────────────────────────────────────────────────────────────

#[test]
fn observe_prepare_apply_search_show() {
  let (_dir, s) = store();
  let obs = observe(&s, "acme-x1", "2.1.0");

  let request = s.compile_prepare(None, 1).unwrap();
  assert_eq!(request.observation_ids, [obs.clone()]);
  assert_eq!(request.observations.len(), 1);
  assert_eq!(request.observations[0].subject.model_id, "acme-x1");

  let mut resp = response(
    vec![profile("acme-x1", "settle", "2.*", 0.9, json!({ "procedure": { "settle_ms": 500 } }), &obs)],
    &[&obs],
  );
  resp["request_id"] = json!(request.request_id);
  let report = s
    .compile_apply(ApplyInput {
      response:    resp,
      input:       "compile_response.json".into(),
      request:     Some(serde_json::to_value(&request).unwrap()),
      request_ref: Some("compile_request.json".into()),
    })
    .unwrap();
  assert_eq!(report.changed_paths, ["spec/memory/profiles/acme-x1/settle.yaml"]);
  assert!(report.routed.is_empty());

  let hits = s.search("acme-x1", "2.1.0").unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].rule_id, "settle");
  assert_eq!(hits[0].confidence, Some(0.9));

  let shown = s.show("acme-x1", "settle").unwrap();
  let on_disk =
    std::fs::read_to_string(s.layout().absolute(&hits[0].path)).unwrap();
  assert_eq!(shown, on_disk);
  assert!(shown.contains("settle_ms: 500"));

  let Some(HistoryEvent::Apply(summary)) = history(&s).pop() else {
    panic!("expected a compile_apply summary last");
  };
  assert_eq!(summary.request_id, request.request_id);
  assert_eq!(summary.request.as_deref(), Some("compile_request.json"));
  assert_eq!(summary.changed_paths, report.changed_paths);
}

#[test]
fn prepare_keeps_the_most_recent_window() {
  let (_dir, s) = store();
  observe(&s, "m", "1.0");
  let second = observe(&s, "m", "1.1");
  let third = observe(&s, "m", "1.2");

  let request = s.compile_prepare(None, 2).unwrap();
  assert_eq!(request.observation_ids, [second, third]);
  assert_eq!(request.policy.min_confidence_profile, Some(0.85));
  assert!(!request.policy.facts_prefix_recommendations.is_empty());
  assert!(!s.layout().index().exists());
}

fn append_raw(path: &std::path::Path, bytes: &[u8]) {
  use std::io::Write as _;
  let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
  file.write_all(bytes).unwrap();
}

#[test]
fn truncated_log_tail_does_not_block_reads() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  append_raw(&s.layout().global_observations(), b"{\"id\":\"x\",\"content\":\"caf\xC3");

  let request = s.compile_prepare(None, 5).unwrap();
  assert_eq!(request.observation_ids, [obs.clone()]);

  apply(&s, response(vec![profile("m", "r", "*", 0.9, json!({}), &obs)], &[&obs])).unwrap();
  append_raw(&s.layout().history(), b"{\"ts\":\"2026-");

  let entries = s
    .timeline(&TimelineQuery {
      model_id: None,
      run_id:   None,
      limit:    50,
    })
    .unwrap();
  assert_eq!(entries.len(), 3);
  assert_eq!(history(&s).len(), 2);
}

#[test]
fn garbage_line_mid_log_is_skipped() {
  let (_dir, s) = store();
  let first = observe(&s, "m", "1.0.0");
  append_raw(&s.layout().global_observations(), b"not json at all\n");
  let second = observe(&s, "m", "1.0.1");

  let request = s.compile_prepare(None, 10).unwrap();
  assert_eq!(request.observation_ids, [first.clone(), second.clone()]);

  let report = apply(
    &s,
    response(vec![profile("m", "r", "*", 0.9, json!({}), &second)], &[&second]),
  )
  .unwrap();
  assert_eq!(report.changed_paths.len(), 1);
}

// ─── Confidence routing ─────────────────────────────────────────────────────

#[test]
fn low_confidence_profile_becomes_a_candidate() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");

  let report = apply(
    &s,
    response(vec![profile("m", "r1", "1.*", 0.5, json!({ "a": 1 }), &obs)], &[&obs]),
  )
  .unwrap();

  assert_eq!(report.routed, ["profile::r1"]);
  assert_eq!(report.changed_paths, ["spec/memory/candidates/m/profile::r1.yaml"]);
  assert!(!exists(&s, "spec/memory/profiles/m/r1.yaml"));

  let text = std::fs::read_to_string(s.layout().absolute(&report.changed_paths[0])).unwrap();
  let doc: CandidateDoc = serde_yaml_bw::from_str(&text).unwrap();
  assert_eq!(doc.model_id, "m");
  assert_eq!(doc.candidate["reason"], json!("confidence<0.85"));
  assert_eq!(doc.candidate["proposal"]["id"], json!("r1"));
  assert!(s.search("m", "1.0.0").unwrap().is_empty());
}

#[test]
fn policy_echo_lowers_the_threshold() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let mut resp =
    response(vec![profile("m", "r1", "1.*", 0.5, json!({ "a": 1 }), &obs)], &[&obs]);
  resp["policy_echo"] = json!({ "min_confidence_profile": 0.4 });

  let report = apply(&s, resp).unwrap();
  assert!(report.routed.is_empty());
  assert_eq!(report.policy.min_confidence_profile, 0.4);
  assert_eq!(report.policy.min_confidence_override, 0.80);
  assert!(exists(&s, "spec/memory/profiles/m/r1.yaml"));
}

#[test]
fn integral_threshold_keeps_its_decimal_in_the_reason() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let mut resp =
    response(vec![profile("m", "r1", "1.*", 0.9, json!({ "a": 1 }), &obs)], &[&obs]);
  resp["policy_echo"] = json!({ "min_confidence_profile": 1.0 });

  let report = apply(&s, resp).unwrap();
  assert_eq!(report.routed, ["profile::r1"]);
  let text = std::fs::read_to_string(s.layout().absolute(&report.changed_paths[0])).unwrap();
  let doc: CandidateDoc = serde_yaml_bw::from_str(&text).unwrap();
  assert_eq!(doc.candidate["reason"], json!("confidence<1.0"));
}

#[test]
fn overrides_are_live_or_routed_by_confidence() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let mut resp = response(vec![], &[&obs]);
  resp["overrides_to_upsert"] = json!([
    {
      "instance_id": "dev-1",
      "confidence": 0.9,
      "provenance": { "observation_ids": [obs] },
      "facts": { "calibration": { "offset": 3 } },
    },
    {
      "instance_id": "dev-2",
      "confidence": 0.5,
      "provenance": { "observation_ids": [obs] },
    },
  ]);

  let report = apply(&s, resp).unwrap();
  assert_eq!(report.changed_paths, [
    "data/memory/overrides/dev-1.yaml",
    "spec/memory/candidates/instance_overrides/override::dev-2.yaml",
  ]);
  assert_eq!(report.routed, ["override::dev-2"]);

  let text = std::fs::read_to_string(s.layout().override_path("dev-1")).unwrap();
  let doc: OverrideDoc = serde_yaml_bw::from_str(&text).unwrap();
  assert_eq!(doc.instance_id, "dev-1");
  assert_eq!(doc.body["facts"]["calibration"]["offset"], json!(3));
  assert!(doc.body["updated_at"].is_string());
}

#[test]
fn explicit_candidates_get_default_owner_and_id() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let mut resp = response(vec![], &[&obs]);
  resp["candidates_to_create"] = json!([
    { "provenance": { "observation_ids": [obs] }, "note": "maybe" },
  ]);

  let report = apply(&s, resp).unwrap();
  assert_eq!(report.changed_paths.len(), 1);
  assert!(report.changed_paths[0].starts_with("spec/memory/candidates/unknown_model/"));
  assert!(report.routed.is_empty());

  let text = std::fs::read_to_string(s.layout().absolute(&report.changed_paths[0])).unwrap();
  let doc: CandidateDoc = serde_yaml_bw::from_str(&text).unwrap();
  assert_eq!(doc.candidate["note"], json!("maybe"));
  assert!(doc.candidate["id"].is_string());
}

// ─── Rejections ─────────────────────────────────────────────────────────────

/// Nothing under the root but the observation log.
fn assert_untouched(s: &FsStore) {
  assert!(!s.layout().history().exists());
  assert!(!s.layout().index().exists());
  assert!(!exists(&s, "spec"));
  assert!(!exists(&s, "data/memory/revisions"));
}

#[test]
fn unknown_observation_aborts_before_any_write() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let resp = response(
    vec![
      profile("m", "good", "1.*", 0.9, json!({ "a": 1 }), &obs),
      profile("m", "bad", "1.*", 0.9, json!({ "a": 2 }), "no-such-observation"),
    ],
    &[&obs, "no-such-observation"],
  );

  let err = apply(&s, resp).unwrap_err();
  let Error::UnknownObservations { context, missing } = err else {
    panic!("expected an unknown-observation error, got {err}");
  };
  assert_eq!(context, "profile rule m/bad");
  assert_eq!(missing, ["no-such-observation"]);
  assert_untouched(&s);
}

#[test]
fn mismatched_request_is_rejected() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let request = s.compile_prepare(None, 10).unwrap();

  let err = s
    .compile_apply(ApplyInput {
      response:    response(vec![profile("m", "r", "*", 0.9, json!({}), &obs)], &[&obs]),
      input:       "compile_response.json".into(),
      request:     Some(serde_json::to_value(&request).unwrap()),
      request_ref: None,
    })
    .unwrap_err();
  assert!(matches!(err, Error::RequestMismatch { ref response, .. } if response == "req-1"));
  assert_untouched(&s);
}

#[test]
fn summary_must_cover_every_cited_observation() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let resp = response(vec![profile("m", "r", "*", 0.9, json!({}), &obs)], &[]);

  let err = apply(&s, resp).unwrap_err();
  assert!(matches!(err, Error::IncompleteProvenanceSummary { ref missing } if missing == &[obs]));
  assert_untouched(&s);
}

#[test]
fn profile_without_range_is_rejected() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let mut item = profile("m", "r", "*", 0.9, json!({}), &obs);
  item["rule"].as_object_mut().unwrap().remove("fw_range");

  let err = apply(&s, response(vec![item], &[&obs])).unwrap_err();
  assert!(matches!(err, Error::MissingField { field: "rule.fw_range", .. }));
  assert_untouched(&s);
}

#[test]
fn unsafe_ids_are_rejected() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let resp = response(vec![profile("../m", "r", "*", 0.9, json!({}), &obs)], &[&obs]);
  assert!(matches!(apply(&s, resp), Err(Error::InvalidKey { .. })));

  let err = s
    .observe(NewObservation {
      run_id:  Some("../escape".into()),
      subject: ObservationSubject {
        model_id:    "m".into(),
        fw_version:  "1".into(),
        instance_id: None,
      },
      source:  ObservationSource::System,
      content: "x".into(),
    })
    .unwrap_err();
  assert!(matches!(err, Error::InvalidKey { what: "run_id", .. }));
}

// ─── Resolution ─────────────────────────────────────────────────────────────

#[test]
fn most_specific_rule_wins_overlapping_facts() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.2.5");
  apply(
    &s,
    response(
      vec![
        profile("m", "major", "1.*", 0.9, json!({ "a": 1, "only_major": true }), &obs),
        profile("m", "minor", "1.2.*", 0.9, json!({ "a": 2 }), &obs),
      ],
      &[&obs],
    ),
  )
  .unwrap();

  let ids: Vec<_> = s
    .search("m", "1.2.5")
    .unwrap()
    .into_iter()
    .map(|e| e.fw_range)
    .collect();
  assert_eq!(ids, ["1.2.*", "1.*"]);

  // Folding the hits in search order would let the broad `1.*` rule win
  // (a == 1). The resolver folds least specific first instead, so the
  // narrow rule's value survives.
  let res = s.resolve("m", "1.2.5", None).unwrap();
  assert_eq!(res.effective_profile.facts["a"], json!(2));
  assert_eq!(res.effective_profile.facts["only_major"], json!(true));
  let matched: Vec<_> = res
    .effective_profile
    .matched_rules
    .iter()
    .map(|r| r.rule_id.as_str())
    .collect();
  assert_eq!(matched, ["minor", "major"]);
}

#[test]
fn instance_override_is_merged_last() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let mut resp = response(
    vec![profile("m", "r", "1.*", 0.9, json!({ "transport": { "baud": 9600, "parity": "none" } }), &obs)],
    &[&obs],
  );
  resp["overrides_to_upsert"] = json!([{
    "instance_id": "dev-1",
    "confidence": 0.95,
    "provenance": { "observation_ids": [obs] },
    "facts": { "transport": { "baud": 115200 } },
  }]);
  apply(&s, resp).unwrap();

  let res = s.resolve("m", "1.0.0", Some("dev-1")).unwrap();
  assert_eq!(
    res.effective_profile.facts,
    json!({ "transport": { "baud": 115200, "parity": "none" } })
  );
  assert_eq!(res.effective_profile.applied_override.as_deref(), Some("dev-1"));

  let plain = s.resolve("m", "1.0.0", None).unwrap();
  assert_eq!(plain.effective_profile.facts["transport"]["baud"], json!(9600));
}

#[test]
fn search_rebuilds_a_missing_index() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "3.0");
  apply(&s, response(vec![profile("m", "r", ">=3.0 <4.0", 0.9, json!({}), &obs)], &[&obs]))
    .unwrap();
  std::fs::remove_file(s.layout().index()).unwrap();

  let hits = s.search("m", "3.4.1").unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].specificity, 22);
  assert!(s.layout().index().exists());
}

// ─── Revisions, history, timeline ───────────────────────────────────────────

#[test]
fn rewrites_are_diffable() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  apply(&s, response(vec![profile("m", "r", "1.*", 0.9, json!({ "a": 1 }), &obs)], &[&obs]))
    .unwrap();
  apply(&s, response(vec![profile("m", "r", "1.*", 0.9, json!({ "a": 2 }), &obs)], &[&obs]))
    .unwrap();

  let upserts: Vec<_> = history(&s)
    .into_iter()
    .filter_map(|e| match e {
      HistoryEvent::Artifact(e) => Some(e),
      HistoryEvent::Apply(_) => None,
    })
    .collect();
  assert_eq!(upserts.len(), 2);
  assert_eq!(upserts[0].from_rev, None);
  assert_eq!(upserts[1].from_rev.as_deref(), Some(upserts[0].to_rev.as_str()));

  let live = s.show("m", "r").unwrap();
  assert_eq!(content_hash(&live), upserts[1].to_rev);

  let from = &upserts[0].to_rev;
  let to = &upserts[1].to_rev;
  let diff = s.diff("m", "r", from, to).unwrap();
  assert!(diff.starts_with(&format!("--- {from}\n+++ {to}\n")));
  assert!(diff.lines().any(|l| l.starts_with('-') && l.contains("a: 1")));
  assert!(diff.lines().any(|l| l.starts_with('+') && l.contains("a: 2")));
}

#[test]
fn timeline_interleaves_observations_and_history() {
  let (_dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  observe(&s, "other", "1.0.0");
  apply(&s, response(vec![profile("m", "r", "*", 0.9, json!({}), &obs)], &[&obs])).unwrap();

  let entries = s
    .timeline(&TimelineQuery {
      model_id: Some("m".into()),
      run_id:   None,
      limit:    50,
    })
    .unwrap();
  let kinds: Vec<_> = entries.iter().map(|e| e.kind).collect();
  assert_eq!(kinds, [
    TimelineKind::Observation,
    TimelineKind::History,
    TimelineKind::History,
  ]);
  assert_eq!(entries[0].data["id"], json!(obs));
  assert_eq!(entries[2].data["kind"], json!("compile_apply"));
}

#[test]
fn show_of_unknown_rule_fails() {
  let (_dir, s) = store();
  assert!(matches!(s.show("m", "nope"), Err(Error::RuleNotFound { .. })));
}

#[test]
fn apply_from_files_records_absolute_paths() {
  let (dir, s) = store();
  let obs = observe(&s, "m", "1.0.0");
  let request_path = dir.path().join("work/compile_request.json");
  let request = s.compile_prepare_to(None, 5, &request_path).unwrap();

  let mut resp = response(vec![profile("m", "r", "*", 0.9, json!({}), &obs)], &[&obs]);
  resp["request_id"] = json!(request.request_id);
  let response_path = dir.path().join("work/compile_response.json");
  std::fs::write(&response_path, resp.to_string()).unwrap();

  s.compile_apply_files(&response_path, Some(&request_path)).unwrap();

  let Some(HistoryEvent::Apply(summary)) = history(&s).pop() else {
    panic!("expected a compile_apply summary last");
  };
  assert_eq!(summary.input, response_path.display().to_string());
  assert_eq!(summary.request, Some(request_path.display().to_string()));
  assert_eq!(
    Layout::profile_rel("m", "r"),
    summary.changed_paths[0]
  );
}
