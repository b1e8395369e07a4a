use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("no usable model cache directory on this platform")]
    NoCacheDir,
    #[error("cannot create model cache at {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model download from {url} failed: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("model server answered {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("model download stream from {url} broke: {source}")]
    Stream {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot store model at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Download progress callback, called with `(bytes_so_far, total_bytes)`;
/// total is 0 when the server sent no Content-Length.
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send>;

/// Locates ONNX model weights, downloading them on first use.
///
/// A model name resolves against the user's cache directory first, then an
/// optional bundled directory, and is fetched from its release URL only
/// when neither holds a copy. A model that cannot be obtained is the
/// "detector unavailable" condition: the error goes back to the caller and
/// a later attempt may succeed once the network or a bundled copy exists.
pub struct ModelResolver {
    cache_dir: PathBuf,
    bundled_dir: Option<PathBuf>,
}

impl ModelResolver {
    /// Resolver over the platform cache location
    /// (`<user cache dir>/FaceAtlas/models/`).
    pub fn new(bundled_dir: Option<PathBuf>) -> Result<Self, ModelResolveError> {
        let cache_dir = dirs::cache_dir()
            .map(|d| d.join("FaceAtlas").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)?;
        Ok(Self {
            cache_dir,
            bundled_dir,
        })
    }

    /// Resolver over an explicit cache directory. Used by tests and by
    /// callers that keep models next to their data.
    pub fn with_cache_dir(cache_dir: PathBuf, bundled_dir: Option<PathBuf>) -> Self {
        Self {
            cache_dir,
            bundled_dir,
        }
    }

    pub fn resolve(
        &self,
        name: &str,
        url: &str,
        progress: Option<ProgressFn>,
    ) -> Result<PathBuf, ModelResolveError> {
        let cached = self.cache_dir.join(name);
        if cached.is_file() {
            return Ok(cached);
        }
        if let Some(bundled) = self.bundled_dir.as_ref().map(|d| d.join(name)) {
            if bundled.is_file() {
                return Ok(bundled);
            }
        }

        fs::create_dir_all(&self.cache_dir).map_err(|e| ModelResolveError::CacheDir {
            path: self.cache_dir.clone(),
            source: e,
        })?;
        log::info!("downloading {name} from {url}");
        fetch(url, &cached, progress)?;
        Ok(cached)
    }
}

/// Streams `url` into `dest` via a `.part` sibling renamed into place, so
/// the cache never holds a truncated model.
fn fetch(url: &str, dest: &Path, progress: Option<ProgressFn>) -> Result<(), ModelResolveError> {
    let mut response =
        reqwest::blocking::get(url).map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;
    if !response.status().is_success() {
        return Err(ModelResolveError::Status {
            url: url.to_string(),
            status: response.status(),
        });
    }
    let total = response.content_length().unwrap_or(0);

    let staging = dest.with_extension("part");
    let io_err = |e: std::io::Error| ModelResolveError::Write {
        path: staging.clone(),
        source: e,
    };
    let mut out = fs::File::create(&staging).map_err(io_err)?;

    let mut chunk = vec![0u8; 1 << 20];
    let mut received: u64 = 0;
    loop {
        let n = response
            .read(&mut chunk)
            .map_err(|e| ModelResolveError::Stream {
                url: url.to_string(),
                source: e,
            })?;
        if n == 0 {
            break;
        }
        out.write_all(&chunk[..n]).map_err(io_err)?;
        received += n as u64;
        if let Some(ref cb) = progress {
            cb(received, total);
        }
    }
    out.flush().map_err(io_err)?;
    drop(out);

    fs::rename(&staging, dest).map_err(|e| ModelResolveError::Write {
        path: dest.to_path_buf(),
        source: e,
    })
}
