//! driftfs-datapath: the per-open-file data engine.
//!
//! Translates arbitrary `write_at(bytes, off)` / `read_at(buf, off)` calls
//! into object-store operations. Two writer and two reader variants exist,
//! selected at open time by filesystem-wide policy:
//!
//! - **[`normal`]** - streams a file as sequential multipart-upload parts
//!   and reads it back through a single sliding window.
//! - **[`chunked`]** - splits a file into chunks (fixed-size or
//!   content-defined), compresses, hashes and dedups each chunk as its own
//!   object, and reads through a per-file manifest with a two-slot cache.
//!
//! Shared pieces: the out-of-order [`reassembly`] buffer, the
//! [`codec`] dispatch, the [`chunker`] (content-defined boundaries) and
//! the [`manifest`] sidecar format.

use std::sync::Arc;

use async_trait::async_trait;
use driftfs_backend::ObjectStorage;
use driftfs_types::Result;

pub mod chunked;
pub mod chunker;
pub mod codec;
pub mod manifest;
pub mod normal;
pub mod reassembly;

pub use chunked::{ChunkReader, ChunkWriter};
pub use codec::{codec_for, Codec};
pub use manifest::{ChunkMeta, Manifest};
pub use normal::{NormalReader, NormalWriter};
pub use reassembly::ReassemblyBuffer;

/// Fixed-mode chunk size: 8 MiB.
pub const FIXED_CHUNK_SIZE: usize = 1 << 23;
/// Dynamic-mode accumulation buffer: 64 MiB.
pub const DYNAMIC_BUF_SIZE: usize = 1 << 26;
/// Largest chunk the dynamic chunker may produce (and the dynamic read
/// slot size): 16 MiB.
pub const DYNAMIC_READ_SIZE: usize = 1 << 24;
/// Smallest chunk the dynamic chunker may produce: 4 MiB.
pub const MIN_DYNAMIC_CHUNK: usize = 1 << 22;
/// Part buffer of the normal writer and window of the normal reader: 64 MiB.
pub const STREAM_CACHE_SIZE: usize = 1 << 26;
/// Object-metadata key carrying the chunk content digest.
pub const CHUNK_ID_KEY: &str = "chunkid";

/// Write side of an open file. One instance per handle; the owning handle
/// serializes all calls.
#[async_trait]
pub trait FileWriter: Send {
    /// Accept `data` at logical offset `off`; offsets may arrive in any
    /// order as long as the final stream is contiguous from zero.
    async fn write_at(&mut self, data: &[u8], off: i64) -> Result<usize>;

    /// Commit everything written so far (final parts, trailing chunk,
    /// manifest).
    async fn flush(&mut self) -> Result<()>;

    /// Drop all in-memory state without touching the backend.
    fn release(&mut self);
}

/// Read side of an open file.
#[async_trait]
pub trait FileReader: Send {
    /// Fill `buf` from logical offset `off`, returning the byte count.
    async fn read_at(&mut self, buf: &mut [u8], off: i64) -> Result<usize>;

    /// Drop all in-memory state without touching the backend.
    fn release(&mut self);
}

/// Filesystem-wide data-path policy, fixed at mount time.
#[derive(Debug, Clone, Default)]
pub struct DataPathOptions {
    /// Store files as chunk objects plus a manifest instead of one blob.
    pub chunked: bool,
    /// In chunked mode, cut at fixed 8 MiB boundaries instead of
    /// content-defined ones.
    pub fixed: bool,
    /// Compression codec name ("zstd", "lz4", "snappy"); empty disables
    /// compression.
    pub compress: String,
}

/// Build the writer variant for `key` according to policy.
pub fn new_writer(
    key: &str,
    backend: Arc<dyn ObjectStorage>,
    options: &DataPathOptions,
) -> Box<dyn FileWriter> {
    if options.chunked {
        Box::new(ChunkWriter::new(
            key,
            backend,
            codec_for(&options.compress),
            options.fixed,
        ))
    } else {
        Box::new(NormalWriter::new(key, backend))
    }
}

/// Build the reader variant for `key` according to policy.
pub fn new_reader(
    key: &str,
    backend: Arc<dyn ObjectStorage>,
    options: &DataPathOptions,
) -> Box<dyn FileReader> {
    if options.chunked {
        Box::new(ChunkReader::new(
            key,
            backend,
            codec_for(&options.compress),
            options.fixed,
        ))
    } else {
        Box::new(NormalReader::new(key, backend))
    }
}
