use serde::{Deserialize, Serialize};

use crate::shared::face_box::FaceBox;

/// A single detected face: where it sits in the image, plus the identity
/// embedding produced by the recognition model.
///
/// Serializes with the per-image record wire format (`box` + `embedding`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    #[serde(rename = "box")]
    pub bounding_box: FaceBox,
    pub embedding: Vec<f32>,
}

/// Domain interface for face detection over encoded image bytes.
///
/// Implementations may be stateful (e.g., ONNX sessions), hence `&mut self`.
/// An error aborts the processing of that one image only; it carries no
/// implication for other images or for already-committed state.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        image_bytes: &[u8],
    ) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>>;
}
