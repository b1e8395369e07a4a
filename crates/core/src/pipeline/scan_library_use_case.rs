use std::fs;
use std::io;
use std::path::Path;

use crate::clustering::cluster_store::{BatchEntry, BatchProgressFn, FaceClusterStore};
use crate::shared::constants::IMAGE_EXTENSIONS;

/// Scans the media library and feeds every image through face processing.
///
/// Walks the library root recursively, collects files with recognized
/// image extensions as root-relative paths (forward slashes, sorted for a
/// stable processing order), and drives the store's sequential batch.
/// Hidden entries are skipped, which also keeps the store's own data
/// directory out of the scan when it lives under the library.
pub struct ScanLibraryUseCase<'a> {
    store: &'a mut FaceClusterStore,
}

impl<'a> ScanLibraryUseCase<'a> {
    pub fn new(store: &'a mut FaceClusterStore) -> Self {
        Self { store }
    }

    pub fn execute(
        &mut self,
        on_progress: Option<BatchProgressFn>,
    ) -> Result<Vec<BatchEntry>, Box<dyn std::error::Error>> {
        let root = self.store.library_root().to_path_buf();
        let filenames = collect_image_files(&root)?;
        log::info!("found {} images under {}", filenames.len(), root.display());
        Ok(self.store.process_images(&filenames, on_progress))
    }
}

/// Root-relative paths of all images under `root`, sorted.
pub fn collect_image_files(root: &Path) -> Result<Vec<String>, io::Error> {
    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), io::Error> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, out)?;
        } else if is_image(&path) {
            if let Ok(rel) = path.strip_prefix(root) {
                let rel: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(rel.join("/"));
            }
        }
    }
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
