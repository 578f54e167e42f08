//! Identity-swap post-process options.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Options forwarded to the identity-swap service. Unknown keys in the
/// page's free-form JSON are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapOptions {
    pub model: String,
    pub face_index: i64,
    pub source_face_index: i64,
    pub upscaler: String,
    pub scale: f64,
    pub upscale_visibility: f64,
    #[serde(alias = "face_restorer")]
    pub restorer: String,
    /// Defaults to 0.8 when a restorer is set, otherwise 0.
    pub restorer_visibility: Option<f64>,
    pub codeformer_weight: f64,
    pub restore_first: i64,
    pub gender_source: i64,
    pub gender_target: i64,
}

impl Default for SwapOptions {
    fn default() -> Self {
        Self {
            model: "inswapper_128.onnx".into(),
            face_index: -1,
            source_face_index: -1,
            upscaler: "None".into(),
            scale: 1.0,
            upscale_visibility: 1.0,
            restorer: "None".into(),
            restorer_visibility: None,
            codeformer_weight: 0.5,
            restore_first: 0,
            gender_source: 0,
            gender_target: 0,
        }
    }
}

impl SwapOptions {
    /// Parse a page's `swap_options`, which may be null, an object, or a
    /// JSON string holding an object.
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::String(s) if s.trim().is_empty() => Ok(Self::default()),
            Value::String(s) => serde_json::from_str(s)
                .map_err(|e| CoreError::Validation(format!("swap options: {e}"))),
            Value::Object(_) => serde_json::from_value(value.clone())
                .map_err(|e| CoreError::Validation(format!("swap options: {e}"))),
            other => Err(CoreError::Validation(format!(
                "swap options must be an object, got {other}"
            ))),
        }
    }

    pub fn has_restorer(&self) -> bool {
        let r = self.restorer.trim();
        !r.is_empty() && !r.eq_ignore_ascii_case("none")
    }

    pub fn effective_restorer_visibility(&self) -> f64 {
        self.restorer_visibility
            .unwrap_or(if self.has_restorer() { 0.8 } else { 0.0 })
    }
}
