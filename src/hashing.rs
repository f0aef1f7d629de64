//! Hashing - SHA-256 Job Fingerprints
//!
//! Two renders with the same formula, packages, strategy and engine
//! version share a job hash.

use sha2::{Digest, Sha256};
use serde::Serialize;
use serde_json::{to_string, Value};

use crate::source::CompileRequest;
use crate::toolchain::Strategy;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// job_hash = sha256(strategy + canonical_request + engine_version)
///
/// The debug flag does not change the output and is left out.
pub fn compute_job_hash(
    request: &CompileRequest,
    strategy: Strategy,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let payload = serde_json::json!({
        "formula": request.formula,
        "extraPackages": request.extra_packages,
    });
    let combined = format!(
        "{}:{}:{}",
        canonical_json(&strategy)?,
        canonical_json(&payload)?,
        engine_version
    );
    Ok(sha256_hex(combined.as_bytes()))
}
