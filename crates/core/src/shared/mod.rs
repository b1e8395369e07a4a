pub mod constants;
pub mod embedding;
pub mod face_box;
