//! Object-storage capability consumed by the driftfs data path.
//!
//! The [`ObjectStorage`] trait is the only surface the engine sees; the
//! concrete client behind it (S3-compatible service or the in-memory
//! backend used for tests and development) is selected at mount time.

use std::collections::HashMap;
use std::time::SystemTime;

use async_trait::async_trait;
use driftfs_types::Result;

pub mod memory;
pub mod s3;

pub use memory::{FaultOp, MemoryBackend};
pub use s3::{S3Backend, S3Options};

/// String-to-string object metadata attached on PUT and returned by HEAD.
pub type Metadata = HashMap<String, String>;

/// Description of a stored object, as returned by `head` and `list`.
#[derive(Debug, Clone)]
pub struct Object {
    pub key: String,
    pub size: i64,
    pub mtime: SystemTime,
    pub is_dir: bool,
    pub metadata: Metadata,
}

/// Parameters of a freshly initiated multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    /// Smallest part size (in bytes) the backend accepts for non-final parts.
    pub min_part_size: usize,
    /// Largest number of parts the backend accepts for one upload.
    pub max_count: i32,
    pub upload_id: String,
}

/// One completed part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub num: i32,
    pub size: usize,
    pub etag: String,
}

/// Async object-storage operations used by the data path and the shell.
///
/// Keys use `/` as a logical separator. A trailing `/` marks a directory
/// placeholder object. All operations may block arbitrarily long; callers
/// hold their per-handle lock across these calls so writes stay strictly
/// sequential.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Human-readable description of the backend, e.g. `s3://bucket`.
    fn describe(&self) -> String;

    /// Create the backing bucket/container if it does not exist yet.
    async fn create(&self) -> Result<()>;

    /// Fetch object size, mtime and metadata without the body.
    async fn head(&self, key: &str) -> Result<Object>;

    /// Read up to `buf.len()` bytes starting at `off` into `buf`.
    ///
    /// A `limit <= 0` means "until end of object or buffer". Returns the
    /// number of bytes read.
    async fn get(&self, key: &str, off: i64, limit: i64, buf: &mut [u8]) -> Result<usize>;

    /// Store `body` under `key` with the given metadata, replacing any
    /// existing object.
    async fn put(&self, key: &str, metadata: Metadata, body: &[u8]) -> Result<()>;

    /// Delete a single object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every object whose key starts with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;

    /// List objects under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<Object>>;

    async fn initiate_multipart(&self, key: &str) -> Result<MultipartUpload>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        num: i32,
        body: &[u8],
    ) -> Result<Part>;

    async fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[Part]) -> Result<()>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;
}
