//! Request and response bodies of the synthesis and swap endpoints.

use bookgen_core::conditioning::ConditioningUnit;
use bookgen_core::swap::SwapOptions;
use serde::{Deserialize, Serialize};

/// Prefix used when an image is sent as a data URL.
pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

/// Wrap plain base64 PNG data in a data URL.
pub fn to_data_url(b64: &str) -> String {
    format!("{PNG_DATA_URL_PREFIX}{b64}")
}

/// Strip a `data:<mime>;base64,` prefix if present.
pub fn strip_data_url(s: &str) -> &str {
    if s.starts_with("data:") {
        if let Some((_, payload)) = s.split_once(',') {
            return payload;
        }
    }
    s
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

/// Ordered conditioning units attached to a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditioningGraph {
    pub units: Vec<ConditioningUnit>,
}

impl ConditioningGraph {
    /// `None` for an empty unit list; the graph is then left out of the
    /// request instead of being sent with no units.
    pub fn from_units(units: Vec<ConditioningUnit>) -> Option<Self> {
        if units.is_empty() {
            None
        } else {
            Some(Self { units })
        }
    }
}

/// Body of `POST /generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub sampler: String,
    pub steps: i64,
    pub cfg_scale: f64,
    /// `-1` lets the service pick.
    pub seed: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditioning_graph: Option<ConditioningGraph>,
    #[serde(default)]
    pub styles: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub images: Vec<String>,
}

// ---------------------------------------------------------------------------
// Identity swap
// ---------------------------------------------------------------------------

/// Body of `POST /swap`. Both images are sent as PNG data URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRequest {
    /// Face to transplant (the record's face image).
    pub source_image: String,
    /// Freshly generated page.
    pub target_image: String,
    pub source_face_index: i64,
    pub face_index: i64,
    pub model: String,
    pub upscaler: String,
    pub scale: f64,
    pub upscale_visibility: f64,
    pub restorer: String,
    pub restorer_visibility: f64,
    pub codeformer_weight: f64,
    pub restore_first: i64,
    pub gender_source: i64,
    pub gender_target: i64,
}

impl SwapRequest {
    pub fn new(source_b64: &str, target_b64: &str, options: &SwapOptions) -> Self {
        Self {
            source_image: to_data_url(source_b64),
            target_image: to_data_url(target_b64),
            source_face_index: options.source_face_index,
            face_index: options.face_index,
            model: options.model.clone(),
            upscaler: options.upscaler.clone(),
            scale: options.scale,
            upscale_visibility: options.upscale_visibility,
            restorer: options.restorer.clone(),
            restorer_visibility: options.effective_restorer_visibility(),
            codeformer_weight: options.codeformer_weight,
            restore_first: options.restore_first,
            gender_source: options.gender_source,
            gender_target: options.gender_target,
        }
    }
}

/// Swap services disagree on the result field; all three shapes are
/// accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwapResponse {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub result: Option<String>,
}

impl SwapResponse {
    /// `image`, else `images[0]`, else `result`; blank values are skipped.
    pub fn into_image(self) -> Option<String> {
        self.image
            .into_iter()
            .chain(self.images.into_iter().take(1))
            .chain(self.result)
            .find(|s| !s.trim().is_empty())
    }
}

/// Body of `GET /progress`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressResponse {
    /// Fraction in `0.0..=1.0`.
    #[serde(default)]
    pub progress: f64,
}
