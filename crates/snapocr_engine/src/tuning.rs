//! Per-model request tuning for small-text (screenshot) recognition.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PP_OCR_V5: &str = "PP-OCRv5";
pub const PP_STRUCTURE_V3: &str = "PP-StructureV3";
pub const PADDLE_OCR_VL: &str = "PaddleOCR-VL";

/// Optional request parameters merged into the OCR payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_det_thresh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_det_box_thresh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_det_unclip_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_rec_score_thresh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum TuningError {
    #[error("{field} must be within {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("textDetUnclipRatio must be positive, got {0}")]
    NonPositiveUnclip(f64),
}

impl TuningParams {
    pub fn is_empty(&self) -> bool {
        *self == TuningParams::default()
    }

    pub fn validate(&self) -> Result<(), TuningError> {
        check_range("textDetThresh", self.text_det_thresh, 0.0, 1.0)?;
        check_range("textDetBoxThresh", self.text_det_box_thresh, 0.0, 1.0)?;
        check_range("textRecScoreThresh", self.text_rec_score_thresh, 0.0, 1.0)?;
        check_range("temperature", self.temperature, 0.0, 2.0)?;
        if let Some(ratio) = self.text_det_unclip_ratio {
            if !(ratio > 0.0) {
                return Err(TuningError::NonPositiveUnclip(ratio));
            }
        }
        Ok(())
    }

    /// Writes the set fields into a JSON request body.
    pub fn apply_to(&self, body: &mut serde_json::Map<String, serde_json::Value>) {
        if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(self) {
            body.extend(fields);
        }
    }
}

fn check_range(
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
) -> Result<(), TuningError> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(TuningError::OutOfRange {
            field,
            value: v,
            min,
            max,
        }),
        _ => Ok(()),
    }
}

/// Built-in small-text profile for a known model; unknown models get none.
pub fn builtin_profile(model: &str) -> TuningParams {
    match model {
        PP_OCR_V5 => TuningParams {
            text_det_thresh: Some(0.15),
            text_det_box_thresh: Some(0.3),
            text_det_unclip_ratio: Some(2.0),
            text_rec_score_thresh: Some(0.0),
            temperature: None,
        },
        PP_STRUCTURE_V3 => TuningParams {
            text_det_thresh: Some(0.15),
            text_det_box_thresh: Some(0.3),
            text_det_unclip_ratio: Some(2.0),
            ..TuningParams::default()
        },
        PADDLE_OCR_VL => TuningParams {
            temperature: Some(0.1),
            ..TuningParams::default()
        },
        _ => TuningParams::default(),
    }
}
