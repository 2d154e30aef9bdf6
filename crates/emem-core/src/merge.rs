//! Deep merge of fact trees.
//!
//! Two mappings merge key by key, recursing while both sides hold a mapping.
//! Any other pairing (scalar, list, or mapping replaced by a non-mapping)
//! takes the incoming value whole. Lists are never concatenated.

use serde_json::{Map, Value};

/// Merge `incoming` over `base`, returning a new tree.
pub fn deep_merge(base: &Value, incoming: &Value) -> Value {
  match (base, incoming) {
    (Value::Object(base), Value::Object(incoming)) => {
      Value::Object(merge_maps(base, incoming))
    }
    (_, incoming) => incoming.clone(),
  }
}

fn merge_maps(
  base: &Map<String, Value>,
  incoming: &Map<String, Value>,
) -> Map<String, Value> {
  let mut out = base.clone();
  for (key, value) in incoming {
    let merged = match out.get(key) {
      Some(existing @ Value::Object(_)) if value.is_object() => {
        deep_merge(existing, value)
      }
      _ => value.clone(),
    };
    out.insert(key.clone(), merged);
  }
  out
}

/// Fold `layers` left to right onto an empty mapping; later layers win.
pub fn fold<'a>(layers: impl IntoIterator<Item = &'a Value>) -> Value {
  layers
    .into_iter()
    .fold(Value::Object(Map::new()), |acc, layer| deep_merge(&acc, layer))
}
