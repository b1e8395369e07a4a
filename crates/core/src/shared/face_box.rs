use serde::{Deserialize, Serialize};

/// Axis-aligned face bounding box in image pixels.
///
/// Coordinates refer to the original image, not the downscaled copy the
/// detector may have seen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceBox {
    /// Scales all coordinates by `factor` (detector space → image space).
    pub fn scaled(&self, factor: f32) -> FaceBox {
        FaceBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    /// Clamps the box to `[0, width] × [0, height]` image bounds.
    pub fn clamped(&self, image_width: u32, image_height: u32) -> FaceBox {
        let iw = image_width as f32;
        let ih = image_height as f32;
        let x = self.x.clamp(0.0, iw);
        let y = self.y.clamp(0.0, ih);
        FaceBox {
            x,
            y,
            width: self.width.min(iw - x),
            height: self.height.min(ih - y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn face_box(x: f32, y: f32, w: f32, h: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
        }
    }

    #[test]
    fn test_scaled_multiplies_all_fields() {
        let b = face_box(10.0, 20.0, 30.0, 40.0).scaled(2.0);
        assert_relative_eq!(b.x, 20.0);
        assert_relative_eq!(b.y, 40.0);
        assert_relative_eq!(b.width, 60.0);
        assert_relative_eq!(b.height, 80.0);
    }

    #[test]
    fn test_scaled_identity() {
        let b = face_box(10.0, 20.0, 30.0, 40.0);
        assert_eq!(b.scaled(1.0), b);
    }

    #[test]
    fn test_clamped_inside_is_unchanged() {
        let b = face_box(10.0, 10.0, 50.0, 50.0);
        assert_eq!(b.clamped(100, 100), b);
    }

    #[test]
    fn test_clamped_negative_origin() {
        let b = face_box(-5.0, -10.0, 50.0, 50.0).clamped(100, 100);
        assert_relative_eq!(b.x, 0.0);
        assert_relative_eq!(b.y, 0.0);
        assert_relative_eq!(b.width, 50.0);
        assert_relative_eq!(b.height, 50.0);
    }

    #[test]
    fn test_clamped_overhanging_edge() {
        let b = face_box(80.0, 90.0, 50.0, 50.0).clamped(100, 100);
        assert_relative_eq!(b.width, 20.0);
        assert_relative_eq!(b.height, 10.0);
    }

    #[test]
    fn test_serialized_field_names() {
        let b = face_box(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["x"], 1.0);
        assert_eq!(json["y"], 2.0);
        assert_eq!(json["width"], 3.0);
        assert_eq!(json["height"], 4.0);
    }
}
