pub const DETECT_MODEL_NAME: &str = "blazeface_short_range.onnx";
pub const DETECT_MODEL_URL: &str =
    "https://github.com/faceatlas/faceatlas/releases/download/v0.1.0/blazeface_short_range.onnx";

pub const EMBED_MODEL_NAME: &str = "mobilefacenet.onnx";
pub const EMBED_MODEL_URL: &str =
    "https://github.com/faceatlas/faceatlas/releases/download/v0.1.0/mobilefacenet.onnx";

/// Length of a face identity embedding.
pub const EMBEDDING_DIM: usize = 128;

/// Cosine similarity a face must exceed (strictly) to join an existing group.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

/// Images with a longer side than this are downscaled before detection.
pub const MAX_DETECT_DIMENSION: u32 = 1280;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
