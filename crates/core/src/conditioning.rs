//! Two-unit image-conditioning payload.
//!
//! Unit 0 is driven by the record's face image. Unit 1 is driven by the
//! page's pose image and falls back to the face image when no pose is
//! available. [`build_units`] is pure: same inputs, same output.

use serde::{Deserialize, Serialize};

/// Lower bound of the guidance range sent with every unit.
pub const GUIDANCE_START: f64 = 0.0;

/// Upper bound of the guidance range sent with every unit.
pub const GUIDANCE_END: f64 = 1.0;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How the conditioning image is fitted onto the target canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "EnumRepr")]
pub enum ResizeMode {
    FitWithin,
    CropToFill,
    FillWithPadding,
}

impl ResizeMode {
    /// Integer encoding used on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::FitWithin => 0,
            Self::CropToFill => 1,
            Self::FillWithPadding => 2,
        }
    }
}

/// Which side wins when prompt and conditioning disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "EnumRepr")]
pub enum ControlMode {
    Balanced,
    PromptPriority,
    ConditioningPriority,
}

impl ControlMode {
    /// Integer encoding used on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::Balanced => 0,
            Self::PromptPriority => 1,
            Self::ConditioningPriority => 2,
        }
    }
}

/// Book files store these enums either as their wire integer or by name.
#[derive(Deserialize)]
#[serde(untagged)]
enum EnumRepr {
    Code(i64),
    Name(String),
}

impl TryFrom<EnumRepr> for ResizeMode {
    type Error = String;

    fn try_from(repr: EnumRepr) -> Result<Self, Self::Error> {
        match repr {
            EnumRepr::Code(0) => Ok(Self::FitWithin),
            EnumRepr::Code(1) => Ok(Self::CropToFill),
            EnumRepr::Code(2) => Ok(Self::FillWithPadding),
            EnumRepr::Code(n) => Err(format!("unknown resize mode {n}")),
            EnumRepr::Name(name) => match name.trim().to_lowercase().as_str() {
                "fit_within" | "just_resize" => Ok(Self::FitWithin),
                "crop_to_fill" | "crop_and_resize" => Ok(Self::CropToFill),
                "fill_with_padding" | "resize_and_fill" => Ok(Self::FillWithPadding),
                other => Err(format!("unknown resize mode '{other}'")),
            },
        }
    }
}

impl TryFrom<EnumRepr> for ControlMode {
    type Error = String;

    fn try_from(repr: EnumRepr) -> Result<Self, Self::Error> {
        match repr {
            EnumRepr::Code(0) => Ok(Self::Balanced),
            EnumRepr::Code(1) => Ok(Self::PromptPriority),
            EnumRepr::Code(2) => Ok(Self::ConditioningPriority),
            EnumRepr::Code(n) => Err(format!("unknown control mode {n}")),
            EnumRepr::Name(name) => match name.trim().to_lowercase().as_str() {
                "balanced" => Ok(Self::Balanced),
                "prompt_priority" => Ok(Self::PromptPriority),
                "conditioning_priority" | "controlnet_priority" => Ok(Self::ConditioningPriority),
                other => Err(format!("unknown control mode '{other}'")),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Unit configuration (book side) and wire unit
// ---------------------------------------------------------------------------

/// Per-page configuration of one conditioning unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub module: String,
    pub model: String,
    pub resize_mode: ResizeMode,
    pub weight: f64,
    pub control_mode: ControlMode,
}

impl UnitConfig {
    /// Default identity unit (unit 0).
    pub fn face_default() -> Self {
        Self {
            module: "InsightFace (InstantID)".into(),
            model: "ip-adapter_instant_id_sdxl [eb2d3ec0]".into(),
            resize_mode: ResizeMode::CropToFill,
            weight: 0.5,
            control_mode: ControlMode::Balanced,
        }
    }

    /// Default keypoint unit (unit 1).
    pub fn pose_default() -> Self {
        Self {
            module: "instant_id_face_keypoints".into(),
            model: "control_instant_id_sdxl [c5c25a50]".into(),
            resize_mode: ResizeMode::FillWithPadding,
            weight: 0.5,
            control_mode: ControlMode::Balanced,
        }
    }
}

/// One unit as sent to the synthesis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditioningUnit {
    pub enabled: bool,
    pub module: String,
    pub model: String,
    pub weight: f64,
    pub resize_mode: u8,
    pub control_mode: u8,
    pub guidance_start: f64,
    pub guidance_end: f64,
    pub pixel_perfect: bool,
    /// Base64-encoded PNG.
    pub image: String,
}

impl ConditioningUnit {
    fn from_config(config: &UnitConfig, image: &str) -> Self {
        Self {
            enabled: true,
            module: config.module.clone(),
            model: config.model.clone(),
            weight: config.weight,
            resize_mode: config.resize_mode.code(),
            control_mode: config.control_mode.code(),
            guidance_start: GUIDANCE_START,
            guidance_end: GUIDANCE_END,
            pixel_perfect: false,
            image: image.to_string(),
        }
    }
}

/// Build the ordered unit list for one page.
///
/// Returns an empty list when `enabled` is false; callers omit the graph
/// entirely in that case. A blank `pose_image` counts as absent.
pub fn build_units(
    face_image: &str,
    pose_image: Option<&str>,
    enabled: bool,
    face_unit: &UnitConfig,
    pose_unit: &UnitConfig,
) -> Vec<ConditioningUnit> {
    if !enabled {
        return Vec::new();
    }
    let pose = pose_image.filter(|p| !p.is_empty()).unwrap_or(face_image);
    vec![
        ConditioningUnit::from_config(face_unit, face_image),
        ConditioningUnit::from_config(pose_unit, pose),
    ]
}
