//! Stored face data encoding.
//!
//! Descriptors written over the life of the system come in several JSON
//! shapes. [`decode_descriptor`] accepts all of them; new records are always
//! written as [`StoredFaceData`].

use crate::types::{Descriptor, QualityLabel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical JSON document persisted for one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFaceData {
    pub descriptor: Descriptor,
    /// Detector confidence at capture time, in percent.
    pub confidence: u8,
    pub quality: QualityLabel,
    pub landmarks: usize,
    pub created_at: DateTime<Utc>,
}

/// Extract a descriptor from any of the stored shapes:
///
/// - `[0.1, 0.2, ...]`
/// - `[[0.1, 0.2, ...], ...]` (first entry)
/// - `{"descriptor": [...]}` or `{"face_descriptor": [...]}`
/// - `[{"descriptor": [...]}, ...]` (first entry)
///
/// Returns `None` for anything else, including arrays with non-numeric or
/// non-finite elements.
pub fn decode_descriptor(value: &Value) -> Option<Descriptor> {
    match value {
        Value::Array(items) => match items.first()? {
            Value::Number(_) => numeric_array(items),
            Value::Array(inner) => numeric_array(inner),
            obj @ Value::Object(_) => decode_descriptor(obj),
            _ => None,
        },
        Value::Object(map) => {
            let inner = map.get("descriptor").or_else(|| map.get("face_descriptor"))?;
            match inner {
                Value::Array(items) => numeric_array(items),
                _ => None,
            }
        }
        _ => None,
    }
}

fn numeric_array(items: &[Value]) -> Option<Descriptor> {
    if items.is_empty() {
        return None;
    }
    let values = items
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect::<Option<Vec<f32>>>()?;
    let descriptor = Descriptor::new(values);
    descriptor.is_finite().then_some(descriptor)
}
