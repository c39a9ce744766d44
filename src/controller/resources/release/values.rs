//! # Override Values
//!
//! Reads the ConfigMap/Secret values documents a Chart references, merges them
//! (Secret wins), normalizes numbers and computes the checksum stored in the
//! values-checksum annotation.

use crate::checksum::sha256_hex;
use crate::constants::VALUES_KEY;
use crate::controller::reconciler::ReconcilerError;
use crate::crd::Chart;
use crate::store::RecordStore;
use serde_json::{Map, Value};
use tracing::debug;

pub type Values = Map<String, Value>;

/// Parse a YAML (or JSON) values document
///
/// An empty or null document is an empty map. Anything other than a mapping is rejected.
pub fn parse_values(source: &str, document: &str) -> Result<Values, ReconcilerError> {
    if document.trim().is_empty() {
        return Ok(Map::new());
    }
    let parsed: Value = serde_yaml::from_str(document)
        .map_err(|e| ReconcilerError::Values(format!("{source}: {e}")))?;
    match parsed {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(ReconcilerError::Values(format!(
            "{source}: expected a mapping, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

/// Merge `overlay` into `base`; nested mappings merge, everything else is replaced
pub fn deep_merge(base: &mut Values, overlay: Values) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn floats with no fractional part into integers, recursively
///
/// The release manager hands integers back losslessly, so `2.0` on our side
/// would otherwise never compare equal to the `2` it reports.
pub fn normalize_numbers(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if !n.is_i64() && !n.is_u64() && is_integral(f) => Value::from(f as i64),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(normalize_map(map)),
        other => other,
    }
}

pub fn normalize_map(map: Values) -> Values {
    map.into_iter()
        .map(|(k, v)| (k, normalize_numbers(v)))
        .collect()
}

/// `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive
fn is_integral(f: f64) -> bool {
    f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
}

/// Rebuild a value with every mapping's keys in sorted order
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// SHA-256 of the canonical JSON form, empty for an empty map
pub fn values_checksum(values: &Values) -> String {
    if values.is_empty() {
        return String::new();
    }
    let document = canonical(&Value::Object(values.clone())).to_string();
    sha256_hex(document.as_bytes())
}

/// Merged and normalized override values for a Chart
pub async fn desired_values(
    store: &dyn RecordStore,
    chart: &Chart,
) -> Result<Values, ReconcilerError> {
    let mut merged = Map::new();
    let Some(config) = chart.spec.config.as_ref() else {
        return Ok(merged);
    };

    if let Some(r) = &config.config_map {
        let source = format!("configmap {}/{}", r.namespace, r.name);
        let document = store
            .get_config_map(&r.namespace, &r.name, VALUES_KEY)
            .await?
            .ok_or_else(|| ReconcilerError::NotFound(source.clone()))?;
        debug!("Read values from {}", source);
        deep_merge(&mut merged, parse_values(&source, &document)?);
    }

    if let Some(r) = &config.secret {
        let source = format!("secret {}/{}", r.namespace, r.name);
        let document = store
            .get_secret(&r.namespace, &r.name, VALUES_KEY)
            .await?
            .ok_or_else(|| ReconcilerError::NotFound(source.clone()))?;
        debug!("Read values from {}", source);
        deep_merge(&mut merged, parse_values(&source, &document)?);
    }

    Ok(normalize_map(merged))
}
