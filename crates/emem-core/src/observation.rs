//! Observations: free-text evidence about a (model, firmware) pair.
//!
//! Observations are immutable once appended to a log. They are only ever
//! consulted by id, as provenance for proposed rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Where an observation came from.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ObservationSource {
  Chat,
  Analysis,
  Report,
  System,
}

/// The device an observation is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationSubject {
  pub model_id:    String,
  pub fw_version:  String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub instance_id: Option<String>,
}

/// One line of an observation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub id:      String,
  pub ts:      DateTime<Utc>,
  pub source:  ObservationSource,
  pub subject: ObservationSubject,
  pub content: String,
}

/// Input to [`crate::store::FactStore::observe`]. The id and timestamp are
/// assigned by the store.
#[derive(Debug, Clone)]
pub struct NewObservation {
  /// Append to `runs/<run_id>/` instead of the global log.
  pub run_id:  Option<String>,
  pub subject: ObservationSubject,
  pub source:  ObservationSource,
  pub content: String,
}

impl NewObservation {
  /// Stamp the observation with a fresh id and the given time.
  pub fn into_observation(self, ts: DateTime<Utc>) -> Observation {
    Observation {
      id: Uuid::new_v4().to_string(),
      ts,
      source: self.source,
      subject: self.subject,
      content: self.content,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn source_string_forms_agree() {
    assert_eq!(ObservationSource::Analysis.to_string(), "analysis");
    assert_eq!(
      "report".parse::<ObservationSource>().unwrap(),
      ObservationSource::Report
    );
    assert_eq!(
      serde_json::to_value(ObservationSource::Chat).unwrap(),
      serde_json::json!("chat")
    );
    assert!("email".parse::<ObservationSource>().is_err());
  }

  #[test]
  fn instance_id_is_omitted_when_absent() {
    let obs = NewObservation {
      run_id:  None,
      subject: ObservationSubject {
        model_id:    "m1".into(),
        fw_version:  "1.0.0".into(),
        instance_id: None,
      },
      source:  ObservationSource::System,
      content: "boot ok".into(),
    }
    .into_observation(Utc::now());

    let json = serde_json::to_value(&obs).unwrap();
    assert!(json["subject"].get("instance_id").is_none());
    assert!(Uuid::parse_str(&obs.id).is_ok());
  }
}
