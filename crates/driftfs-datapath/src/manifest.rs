//! Per-file chunk manifest.
//!
//! Chunked files store their layout as a JSON array of [`ChunkMeta`]
//! records in a sidecar object at `<file_key>/.meta`. Records are ordered
//! by index, ranges are contiguous from zero, and the writer keeps one
//! trailing sentinel record (`start == end`) that the next commit fills
//! in. Readers must skip sentinels.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use driftfs_types::{make_error_msg, status_code::DataCode, Result};

/// Key of the manifest sidecar for `file_key`.
pub fn manifest_key(file_key: &str) -> String {
    format!("{}/.meta", file_key)
}

/// Key of chunk object `index` for `file_key`.
pub fn chunk_key(file_key: &str, index: u32) -> String {
    format!("{}/{}", file_key, index)
}

/// SHA-256 digest of a chunk's stored bytes, rendered lowercase-hex for
/// the `chunkid` metadata attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDigest([u8; 32]);

impl ChunkDigest {
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

impl std::fmt::Display for ChunkDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// One committed chunk: logical range `[start, end)` plus the stored
/// (post-compression) byte count, 0 when compression is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub index: u32,
    pub start: i64,
    pub end: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub compress_size: i64,
}

impl ChunkMeta {
    /// A sentinel record holds no data.
    pub fn is_sentinel(&self) -> bool {
        self.start >= self.end
    }
}

/// Ordered chunk layout of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    records: Vec<ChunkMeta>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    /// A fresh manifest starts with the sentinel the first commit fills.
    pub fn new() -> Self {
        Self {
            records: vec![ChunkMeta {
                index: 0,
                start: 0,
                end: 0,
                compress_size: 0,
            }],
        }
    }

    pub fn records(&self) -> &[ChunkMeta] {
        &self.records
    }

    /// Index the next committed chunk will get.
    pub fn next_index(&self) -> u32 {
        self.records.last().map(|m| m.index).unwrap_or(0)
    }

    /// Fill the tail sentinel up to `end` and append a new sentinel
    /// starting there.
    pub fn commit(&mut self, end: i64, compress_size: i64) {
        let tail = self.records.last_mut().expect("manifest never empty");
        tail.end = end;
        tail.compress_size = compress_size;
        let next = ChunkMeta {
            index: tail.index + 1,
            start: end,
            end: 0,
            compress_size: 0,
        };
        self.records.push(next);
    }

    /// Logical file size: the end of the last committed chunk.
    pub fn logical_size(&self) -> i64 {
        self.records
            .iter()
            .rev()
            .find(|m| !m.is_sentinel())
            .map(|m| m.end)
            .unwrap_or(0)
    }

    /// Find the chunk containing `off`, and the follow-up chunk when the
    /// `len`-byte request straddles its end. Sentinels never match.
    pub fn locate(&self, off: i64, len: i64) -> (Option<usize>, Option<usize>) {
        let mut first = None;
        let mut second = None;
        for (i, m) in self.records.iter().enumerate() {
            if m.is_sentinel() {
                continue;
            }
            if off < m.start || off >= m.end {
                continue;
            }
            first = Some(i);
            if off + len > m.end {
                second = Some(i + 1);
            }
            break;
        }
        if let Some(s) = second {
            match self.records.get(s) {
                Some(m) if !m.is_sentinel() => {}
                _ => second = None,
            }
        }
        (first, second)
    }

    /// Logical bounds of the chunk at position `i`.
    pub fn bounds(&self, i: usize) -> (i64, i64) {
        let m = &self.records[i];
        (m.start, m.end)
    }

    /// Stored size of the chunk at position `i` (0 when uncompressed).
    pub fn compress_size(&self, i: usize) -> i64 {
        self.records[i].compress_size
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.records)
            .map_err(|e| driftfs_types::Status::with_message(DataCode::MANIFEST_CORRUPT, e.to_string()))
    }

    /// Parse and validate a manifest fetched from the backend.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let records: Vec<ChunkMeta> = serde_json::from_slice(data).map_err(|e| {
            driftfs_types::Status::with_message(DataCode::MANIFEST_CORRUPT, e.to_string())
        })?;
        let manifest = Self { records };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check ordering invariants: indexes 0..N-1, ranges contiguous from
    /// zero.
    pub fn validate(&self) -> Result<()> {
        let mut expected_start = 0i64;
        for (i, m) in self.records.iter().enumerate() {
            if m.index as usize != i {
                return make_error_msg(
                    DataCode::MANIFEST_CORRUPT,
                    format!("record {} has index {}", i, m.index),
                );
            }
            if m.is_sentinel() {
                continue;
            }
            if m.start != expected_start {
                return make_error_msg(
                    DataCode::MANIFEST_CORRUPT,
                    format!("record {} starts at {}, expected {}", i, m.start, expected_start),
                );
            }
            expected_start = m.end;
        }
        Ok(())
    }
}
