/// ONNX-backed face detection oracle.
///
/// Two-stage pipeline over one decoded image: a BlazeFace short-range model
/// proposes face boxes, then a MobileFaceNet model turns each face crop into
/// a 128-dimension identity embedding. Oversized images are downscaled
/// before detection to bound per-image cost; reported boxes are mapped back
/// to original pixel coordinates.
use std::path::Path;

use image::imageops;
use image::RgbImage;

use crate::detection::domain::face_detector::{DetectedFace, FaceDetector};
use crate::shared::constants::{EMBEDDING_DIM, MAX_DETECT_DIMENSION};
use crate::shared::embedding::l2_normalize;
use crate::shared::face_box::FaceBox;

/// BlazeFace model input resolution.
const DETECT_INPUT_SIZE: u32 = 128;

/// MobileFaceNet model input resolution.
const EMBED_INPUT_SIZE: u32 = 112;

/// Number of BlazeFace anchors (short-range model).
const NUM_ANCHORS: usize = 896;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.3;

/// Default detection confidence threshold.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const EMBED_NORM_MEAN: f32 = 127.5;
const EMBED_NORM_STD: f32 = 127.5;

pub struct OnnxFaceDetector {
    detect_session: ort::session::Session,
    embed_session: ort::session::Session,
    confidence: f64,
    anchors: Vec<[f32; 2]>,
}

impl OnnxFaceDetector {
    /// Load both ONNX models. Fails if either model file is missing or
    /// invalid — the "detector unavailable" condition.
    pub fn new(
        detect_model: &Path,
        embed_model: &Path,
        confidence: f64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let intra_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let detect_session = build_session(detect_model, intra_threads)?;
        let embed_session = build_session(embed_model, intra_threads)?;
        Ok(Self {
            detect_session,
            embed_session,
            confidence,
            anchors: generate_anchors(),
        })
    }

    fn embed(&mut self, crop: &RgbImage) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let tensor = embed_preprocess(crop);
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let outputs = self.embed_session.run(ort::inputs![input_value])?;
        let embedding_array = outputs[0].try_extract_array::<f32>()?;
        let embedding_slice = embedding_array
            .as_slice()
            .ok_or("embedding tensor is not contiguous")?;

        if embedding_slice.len() != EMBEDDING_DIM {
            return Err(format!(
                "embedding model produced {} values, expected {EMBEDDING_DIM}",
                embedding_slice.len()
            )
            .into());
        }

        let mut embedding = embedding_slice.to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(
        &mut self,
        image_bytes: &[u8],
    ) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>> {
        let decoded = image::load_from_memory(image_bytes)?;
        let (rgb, restore_scale) = cap_dimension(decoded.to_rgb8(), MAX_DETECT_DIMENSION);

        // 1. Detection pass: copy out the raw tensors so the session borrow
        //    ends before the embedding session runs.
        let input_tensor = detect_preprocess(&rgb, DETECT_INPUT_SIZE);
        let (reg_data, score_data) = {
            let input_value = ort::value::Tensor::from_array(input_tensor)?;
            let outputs = self.detect_session.run(ort::inputs![input_value])?;

            // Short-range BlazeFace emits regressors [1, 896, 16] (box
            // deltas + keypoints) and classificators [1, 896, 1] (scores).
            if outputs.len() < 2 {
                return Err(format!(
                    "detection model expected 2 outputs, got {}",
                    outputs.len()
                )
                .into());
            }
            let regressors = outputs[0].try_extract_array::<f32>()?;
            let scores = outputs[1].try_extract_array::<f32>()?;
            (
                regressors
                    .as_slice()
                    .ok_or("regressor tensor is not contiguous")?
                    .to_vec(),
                scores
                    .as_slice()
                    .ok_or("score tensor is not contiguous")?
                    .to_vec(),
            )
        };

        // 2. Decode anchors, filter by confidence, suppress overlaps
        let mut raw_dets = decode_boxes(
            &reg_data,
            &score_data,
            &self.anchors,
            self.confidence,
            rgb.width(),
            rgb.height(),
        );
        let kept = nms(&mut raw_dets, NMS_IOU_THRESH);

        // 3. Embed each face crop
        let mut faces = Vec::with_capacity(kept.len());
        for det in &kept {
            let face_box = FaceBox {
                x: det.x1 as f32,
                y: det.y1 as f32,
                width: (det.x2 - det.x1) as f32,
                height: (det.y2 - det.y1) as f32,
            };
            let crop_box = face_box.clamped(rgb.width(), rgb.height());
            let x = crop_box.x.floor() as u32;
            let y = crop_box.y.floor() as u32;
            let w = (crop_box.width.ceil() as u32).min(rgb.width().saturating_sub(x));
            let h = (crop_box.height.ceil() as u32).min(rgb.height().saturating_sub(y));
            if w == 0 || h == 0 {
                continue;
            }

            let crop = imageops::crop_imm(&rgb, x, y, w, h).to_image();
            let embedding = self.embed(&crop)?;

            faces.push(DetectedFace {
                bounding_box: face_box.scaled(restore_scale),
                embedding,
            });
        }

        Ok(faces)
    }
}

fn build_session(
    model_path: &Path,
    intra_threads: usize,
) -> Result<ort::session::Session, Box<dyn std::error::Error>> {
    Ok(ort::session::Session::builder()?
        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
        .with_inter_threads(1)?
        .with_intra_threads(intra_threads)?
        .with_execution_providers(preferred_execution_providers())?
        .commit_from_file(model_path)?)
}

/// Preferred ONNX execution providers for the current platform, with CPU
/// fallback when the platform-specific provider is unavailable.
fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Downscale so the longest side is at most `max_dim`, preserving aspect.
///
/// Returns the working image and the factor that maps its coordinates back
/// to the original image (1.0 when no downscaling happened).
fn cap_dimension(rgb: RgbImage, max_dim: u32) -> (RgbImage, f32) {
    let longest = rgb.width().max(rgb.height());
    if longest <= max_dim {
        return (rgb, 1.0);
    }
    let scale = max_dim as f32 / longest as f32;
    let new_w = ((rgb.width() as f32 * scale).round() as u32).max(1);
    let new_h = ((rgb.height() as f32 * scale).round() as u32).max(1);
    let resized = imageops::resize(&rgb, new_w, new_h, imageops::FilterType::Triangle);
    let restore = longest as f32 / new_w.max(new_h) as f32;
    (resized, restore)
}

/// Resize to `size × size`, normalize to [0,1], NCHW float32.
fn detect_preprocess(rgb: &RgbImage, size: u32) -> ndarray::Array4<f32> {
    let src_w = rgb.width() as usize;
    let src_h = rgb.height() as usize;
    let s = size as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, s, s));

    for y in 0..s {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / s as f64) as u32).min(rgb.height() - 1);
        for x in 0..s {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / s as f64) as u32).min(rgb.width() - 1);
            let pixel = rgb.get_pixel(src_x, src_y);
            for c in 0..3 {
                tensor[[0, c, y, x]] = pixel[c] as f32 / 255.0;
            }
        }
    }

    tensor
}

/// Resize crop to 112×112, normalize to [-1,1], NCHW layout.
fn embed_preprocess(crop: &RgbImage) -> ndarray::Array4<f32> {
    let src_w = crop.width() as usize;
    let src_h = crop.height() as usize;
    let s = EMBED_INPUT_SIZE as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, s, s));

    for y in 0..s {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / s as f64) as u32).min(crop.height() - 1);
        for x in 0..s {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / s as f64) as u32).min(crop.width() - 1);
            let pixel = crop.get_pixel(src_x, src_y);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (pixel[c] as f32 - EMBED_NORM_MEAN) / EMBED_NORM_STD;
            }
        }
    }

    tensor
}

// ---------------------------------------------------------------------------
// Anchor generation (BlazeFace short-range)
// ---------------------------------------------------------------------------

/// Generate BlazeFace anchors for the short-range model: 16×16 and 8×8
/// feature maps with 2 and 6 anchors per cell respectively.
fn generate_anchors() -> Vec<[f32; 2]> {
    let strides = [(8, 2), (16, 6)]; // (stride, anchors_per_cell)
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    for &(stride, num) in &strides {
        let grid_size = DETECT_INPUT_SIZE as usize / stride;
        for y in 0..grid_size {
            for x in 0..grid_size {
                let cx = (x as f32 + 0.5) / grid_size as f32;
                let cy = (y as f32 + 0.5) / grid_size as f32;
                for _ in 0..num {
                    anchors.push([cx, cy]);
                }
            }
        }
    }

    anchors
}

// ---------------------------------------------------------------------------
// Box decoding + NMS
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct RawDet {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    score: f64,
}

/// Decode anchor-relative box regressions into image-space detections,
/// keeping only those above the confidence threshold.
fn decode_boxes(
    reg_data: &[f32],
    score_data: &[f32],
    anchors: &[[f32; 2]],
    confidence: f64,
    image_width: u32,
    image_height: u32,
) -> Vec<RawDet> {
    let iw = image_width as f32;
    let ih = image_height as f32;
    let mut dets = Vec::new();
    let num_anchors = anchors.len().min(NUM_ANCHORS);

    for (i, &raw_score) in score_data.iter().enumerate().take(num_anchors) {
        let score = sigmoid(raw_score);
        if (score as f64) < confidence {
            continue;
        }

        let anchor = &anchors[i];
        let reg_offset = i * 16;
        if reg_offset + 4 > reg_data.len() {
            break;
        }

        // Box center + size relative to anchor, in unit coordinates
        let cx = anchor[0] + reg_data[reg_offset] / DETECT_INPUT_SIZE as f32;
        let cy = anchor[1] + reg_data[reg_offset + 1] / DETECT_INPUT_SIZE as f32;
        let w = reg_data[reg_offset + 2] / DETECT_INPUT_SIZE as f32;
        let h = reg_data[reg_offset + 3] / DETECT_INPUT_SIZE as f32;

        let x1 = ((cx - w / 2.0) * iw).max(0.0);
        let y1 = ((cy - h / 2.0) * ih).max(0.0);
        let x2 = ((cx + w / 2.0) * iw).min(iw);
        let y2 = ((cy + h / 2.0) * ih).min(ih);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        dets.push(RawDet {
            x1: x1 as f64,
            y1: y1 as f64,
            x2: x2 as f64,
            y2: y2 as f64,
            score: score as f64,
        });
    }

    dets
}

fn nms(dets: &mut [RawDet], iou_thresh: f64) -> Vec<RawDet> {
    dets.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; dets.len()];

    for i in 0..dets.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(dets[i].clone());
        for j in (i + 1)..dets.len() {
            if suppressed[j] {
                continue;
            }
            if bbox_iou(&dets[i], &dets[j]) > iou_thresh {
                suppressed[j] = true;
            }
        }
    }
    keep
}

fn bbox_iou(a: &RawDet, b: &RawDet) -> f64 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    inter / (area_a + area_b - inter)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([128, 128, 128]))
    }

    #[test]
    fn test_cap_dimension_small_image_untouched() {
        let (rgb, restore) = cap_dimension(gray_image(640, 480), MAX_DETECT_DIMENSION);
        assert_eq!((rgb.width(), rgb.height()), (640, 480));
        assert_eq!(restore, 1.0);
    }

    #[test]
    fn test_cap_dimension_downscales_longest_side() {
        let (rgb, restore) = cap_dimension(gray_image(4000, 2000), 1000);
        assert_eq!(rgb.width(), 1000);
        assert_eq!(rgb.height(), 500);
        assert!((restore - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_cap_dimension_preserves_aspect_for_portrait() {
        let (rgb, _) = cap_dimension(gray_image(1500, 3000), 1000);
        assert_eq!(rgb.height(), 1000);
        assert_eq!(rgb.width(), 500);
    }

    #[test]
    fn test_detect_preprocess_shape() {
        let tensor = detect_preprocess(&gray_image(200, 100), 128);
        assert_eq!(tensor.shape(), &[1, 3, 128, 128]);
    }

    #[test]
    fn test_detect_preprocess_normalized_to_unit_range() {
        let rgb = RgbImage::from_pixel(50, 50, image::Rgb([255, 255, 255]));
        let tensor = detect_preprocess(&rgb, 128);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_embed_preprocess_shape() {
        let tensor = embed_preprocess(&gray_image(64, 80));
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_embed_preprocess_midpoint_maps_near_zero() {
        let rgb = RgbImage::from_pixel(10, 10, image::Rgb([127, 127, 127]));
        let tensor = embed_preprocess(&rgb);
        let expected = (127.0 - EMBED_NORM_MEAN) / EMBED_NORM_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 0.01);
    }

    #[test]
    fn test_embed_preprocess_extremes() {
        let white = embed_preprocess(&RgbImage::from_pixel(10, 10, image::Rgb([255, 255, 255])));
        let black = embed_preprocess(&RgbImage::from_pixel(10, 10, image::Rgb([0, 0, 0])));
        assert!((white[[0, 0, 0, 0]] - 1.0).abs() < 0.01);
        assert!((black[[0, 0, 0, 0]] - (-1.0)).abs() < 0.01);
    }

    #[test]
    fn test_generate_anchors_count() {
        // 2 anchors over the 16×16 grid plus 6 over the 8×8 grid
        assert_eq!(generate_anchors().len(), NUM_ANCHORS);
    }

    #[test]
    fn test_anchor_centers_stay_inside_unit_square() {
        for [cx, cy] in generate_anchors() {
            assert!((0.0..1.0).contains(&cx));
            assert!((0.0..1.0).contains(&cy));
        }
    }

    #[test]
    fn test_sigmoid_range() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(8.0) > 0.999);
        assert!(sigmoid(-8.0) < 0.001);
    }

    #[test]
    fn test_decode_boxes_all_below_confidence() {
        let anchors = generate_anchors();
        // Raw score -10 → sigmoid ≈ 0, well below any sane threshold
        let scores = vec![-10.0f32; NUM_ANCHORS];
        let regs = vec![0.0f32; NUM_ANCHORS * 16];
        let dets = decode_boxes(&regs, &scores, &anchors, 0.5, 640, 480);
        assert!(dets.is_empty());
    }

    #[test]
    fn test_decode_boxes_confident_anchor_produces_detection() {
        let anchors = generate_anchors();
        let mut scores = vec![-10.0f32; NUM_ANCHORS];
        scores[0] = 10.0; // sigmoid ≈ 1.0
        let mut regs = vec![0.0f32; NUM_ANCHORS * 16];
        // 32×32 pixel box centered on the first anchor
        regs[2] = 32.0;
        regs[3] = 32.0;
        let dets = decode_boxes(&regs, &scores, &anchors, 0.5, 128, 128);
        assert_eq!(dets.len(), 1);
        assert!(dets[0].x2 > dets[0].x1);
        assert!(dets[0].y2 > dets[0].y1);
    }

    fn det(x1: f64, y1: f64, x2: f64, y2: f64, score: f64) -> RawDet {
        RawDet {
            x1,
            y1,
            x2,
            y2,
            score,
        }
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlapping_pair() {
        let mut dets = vec![
            det(40.0, 40.0, 120.0, 120.0, 0.65),
            det(44.0, 38.0, 124.0, 118.0, 0.95),
        ];
        let kept = nms(&mut dets, NMS_IOU_THRESH);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_nms_keeps_separate_faces() {
        let mut dets = vec![
            det(10.0, 10.0, 60.0, 60.0, 0.9),
            det(300.0, 40.0, 360.0, 100.0, 0.85),
            det(12.0, 8.0, 58.0, 62.0, 0.6),
        ];
        let kept = nms(&mut dets, NMS_IOU_THRESH);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_bbox_iou() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((bbox_iou(&a, &a) - 1.0).abs() < 1e-9);

        // Half-overlapping square: inter 50, union 150
        let b = det(5.0, 0.0, 15.0, 10.0, 1.0);
        assert!((bbox_iou(&a, &b) - 1.0 / 3.0).abs() < 1e-9);

        let far = det(50.0, 50.0, 60.0, 60.0, 1.0);
        assert_eq!(bbox_iou(&a, &far), 0.0);
    }
}
