use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::clustering::face_cluster::FaceCluster;
use crate::clustering::image_record::{record_key, GroupAssignment, ImageFaceRecord};
use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::embedding::cosine_similarity;
use crate::storage::domain::record_store::RecordStore;

/// Storage key of the cluster-set blob.
const GROUPS_KEY: &str = "face-groups.json";

/// Best-matching face group for an embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterMatch {
    pub group_id: String,
    pub similarity: f64,
}

/// Snapshot of one face group for query callers.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceGroupSummary {
    pub id: String,
    pub image_count: usize,
    pub images: Vec<String>,
}

/// Outcome of one item in a batch run. Failures are recorded per item and
/// never abort the rest of the batch.
#[derive(Debug)]
pub struct BatchEntry {
    pub filename: String,
    pub outcome: Result<ImageFaceRecord, String>,
}

/// Progress callback for batch processing: `(current, total, filename)`,
/// invoked after each item whether it succeeded or failed.
pub type BatchProgressFn = Box<dyn Fn(usize, usize, &str) + Send>;

/// The authoritative mapping from face identity to image membership.
///
/// Every group lives in memory; for each newly detected face the store
/// decides whether it joins an existing identity or starts a new one, by
/// cosine similarity against each group's reference embedding. The group
/// map is a `BTreeMap` keyed by id, so iteration — and therefore
/// tie-breaking between equally similar groups — is lexicographic by id
/// and stable across restarts.
///
/// All mutating operations take `&mut self`: one writer at a time is
/// enforced by the borrow checker. Callers that expose concurrent entry
/// points (e.g. parallel web requests) must put the store behind a single
/// lock; the read-only queries take `&self`.
pub struct FaceClusterStore {
    library_root: PathBuf,
    records: Box<dyn RecordStore>,
    detector: Box<dyn FaceDetector>,
    threshold: f64,
    clusters: BTreeMap<String, FaceCluster>,
}

impl FaceClusterStore {
    pub fn new(
        library_root: PathBuf,
        records: Box<dyn RecordStore>,
        detector: Box<dyn FaceDetector>,
        threshold: f64,
    ) -> Self {
        Self {
            library_root,
            records,
            detector,
            threshold,
            clusters: BTreeMap::new(),
        }
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Reads the persisted group set into memory.
    ///
    /// Missing or malformed storage is non-fatal: the store starts empty
    /// and the next successful save overwrites the blob.
    pub fn load(&mut self) {
        if !self.records.exists(GROUPS_KEY) {
            log::debug!("no persisted face groups, starting empty");
            return;
        }
        let parsed = self
            .records
            .read(GROUPS_KEY)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()));
        match parsed {
            Ok(clusters) => {
                self.clusters = clusters;
                log::info!("loaded {} face groups", self.clusters.len());
            }
            Err(e) => {
                log::warn!("malformed face group store, starting empty: {e}");
                self.clusters = BTreeMap::new();
            }
        }
    }

    /// Serializes the entire group set and overwrites the persisted blob.
    ///
    /// A failure leaves the in-memory state intact and usable; the on-disk
    /// copy simply falls behind until the next successful save.
    pub fn save(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let bytes = serde_json::to_vec_pretty(&self.clusters)?;
        self.records.write(GROUPS_KEY, &bytes)?;
        Ok(())
    }

    /// Best group for an embedding, if its similarity strictly exceeds the
    /// threshold. Pure query: never mutates group state.
    pub fn match_face(&self, embedding: &[f32]) -> Option<ClusterMatch> {
        let mut best: Option<ClusterMatch> = None;
        for (id, cluster) in &self.clusters {
            let similarity = cosine_similarity(embedding, &cluster.reference_embedding);
            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(ClusterMatch {
                    group_id: id.clone(),
                    similarity,
                });
            }
        }
        best.filter(|m| m.similarity > self.threshold)
    }

    /// Detects faces in one library image and commits the group decisions.
    ///
    /// Idempotent: a filename that already has a persisted record returns
    /// it unchanged, with no detector call and no group mutation. Each
    /// detected face is matched independently against the group set, in
    /// detection order; a face with no match above the threshold starts a
    /// new group anchored on its own embedding (similarity 1.0 recorded).
    pub fn process_image(
        &mut self,
        filename: &str,
    ) -> Result<ImageFaceRecord, Box<dyn std::error::Error>> {
        let key = record_key(filename);
        if self.records.exists(&key) {
            match self.cached_record(&key) {
                Ok(record) => return Ok(record),
                Err(e) => log::warn!("discarding unreadable face record {key}: {e}"),
            }
        }

        let path = self.library_root.join(filename);
        let image_bytes =
            fs::read(&path).map_err(|e| format!("cannot read image {}: {e}", path.display()))?;
        let faces = self.detector.detect(&image_bytes)?;

        let mut groups = Vec::with_capacity(faces.len());
        let mut changed = false;
        for face in &faces {
            let assignment = match self.match_face(&face.embedding) {
                Some(m) => {
                    if let Some(cluster) = self.clusters.get_mut(&m.group_id) {
                        changed |= cluster.images.insert(filename.to_string());
                    }
                    GroupAssignment {
                        group_id: m.group_id,
                        similarity: m.similarity,
                    }
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    self.clusters.insert(
                        id.clone(),
                        FaceCluster::new(face.embedding.clone(), filename.to_string()),
                    );
                    changed = true;
                    log::debug!("new face group {id} anchored on {filename}");
                    GroupAssignment {
                        group_id: id,
                        similarity: 1.0,
                    }
                }
            };
            groups.push(assignment);
        }

        let record = ImageFaceRecord {
            filename: filename.to_string(),
            faces,
            groups,
        };
        self.records
            .write(&key, &serde_json::to_vec_pretty(&record)?)?;
        if changed {
            self.save()?;
        }
        Ok(record)
    }

    /// Processes a batch of filenames strictly sequentially.
    ///
    /// Sequential by design: the detector is assumed CPU-heavy, so one
    /// in-flight image bounds peak cost. A single item's failure is
    /// recorded in its entry and the batch continues; there is no
    /// mid-batch abort.
    pub fn process_images(
        &mut self,
        filenames: &[String],
        on_progress: Option<BatchProgressFn>,
    ) -> Vec<BatchEntry> {
        let total = filenames.len();
        let mut entries = Vec::with_capacity(total);
        for (i, filename) in filenames.iter().enumerate() {
            let outcome = self.process_image(filename).map_err(|e| e.to_string());
            if let Err(ref e) = outcome {
                log::warn!("face processing failed for {filename}: {e}");
            }
            if let Some(ref callback) = on_progress {
                callback(i + 1, total, filename);
            }
            entries.push(BatchEntry {
                filename: filename.clone(),
                outcome,
            });
        }
        entries
    }

    /// Snapshot of every group: id, image count, image list.
    pub fn get_face_groups(&self) -> Vec<FaceGroupSummary> {
        self.clusters
            .iter()
            .map(|(id, cluster)| FaceGroupSummary {
                id: id.clone(),
                image_count: cluster.images.len(),
                images: cluster.images.iter().cloned().collect(),
            })
            .collect()
    }

    /// Image list for one group id. An unknown id is a normal query
    /// outcome (e.g. a group purged externally) and yields an empty list.
    pub fn get_group_images(&self, group_id: &str) -> Vec<String> {
        self.clusters
            .get(group_id)
            .map(|c| c.images.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn cached_record(&self, key: &str) -> Result<ImageFaceRecord, Box<dyn std::error::Error>> {
        let bytes = self.records.read(key)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
