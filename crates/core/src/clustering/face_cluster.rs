use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A group of images believed to contain the same person.
///
/// Anchored by the embedding of the first face ever assigned to the group;
/// the reference is never recomputed or averaged afterwards, which keeps
/// matching at O(groups) per face. The image set is non-empty for the
/// group's whole lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceCluster {
    pub reference_embedding: Vec<f32>,
    pub images: BTreeSet<String>,
}

impl FaceCluster {
    pub fn new(reference_embedding: Vec<f32>, first_image: String) -> Self {
        Self {
            reference_embedding,
            images: BTreeSet::from([first_image]),
        }
    }
}
