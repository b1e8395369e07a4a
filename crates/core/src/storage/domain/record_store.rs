use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("failed to read record {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write record {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Domain interface for persisted blobs, keyed by relative string keys.
///
/// Keys may contain `/` separators; the implementation decides the on-disk
/// layout. A write must never expose partially-written content to a
/// concurrent reader of the same key.
pub trait RecordStore: Send {
    fn exists(&self, key: &str) -> bool;
    fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;
    fn write(&mut self, key: &str, data: &[u8]) -> Result<(), StoreError>;
}
