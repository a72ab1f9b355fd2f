//! In-memory object storage for testing and development.
//!
//! [`MemoryBackend`] keeps objects in a `DashMap` and mimics the multipart
//! protocol of an S3-style service. Beyond plain storage it offers two
//! test hooks: per-operation call counters and scripted fault injection,
//! which the data-path tests use to verify dedup-probe counts and
//! sticky-error behavior.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use driftfs_types::{make_error_msg, status_code::BackendCode, Result};

use crate::{Metadata, MultipartUpload, Object, ObjectStorage, Part};

/// Operations that can be counted and made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    Head,
    Get,
    Put,
    Delete,
    List,
    Initiate,
    UploadPart,
    Complete,
    Abort,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: Metadata,
    mtime: SystemTime,
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<i32, Vec<u8>>,
}

#[derive(Debug, Default)]
struct OpCounters {
    head: AtomicU64,
    get: AtomicU64,
    put: AtomicU64,
    delete: AtomicU64,
    list: AtomicU64,
    initiate: AtomicU64,
    upload_part: AtomicU64,
    complete: AtomicU64,
    abort: AtomicU64,
}

impl OpCounters {
    fn bump(&self, op: FaultOp) -> u64 {
        self.slot(op).fetch_add(1, Ordering::Relaxed) + 1
    }

    fn slot(&self, op: FaultOp) -> &AtomicU64 {
        match op {
            FaultOp::Head => &self.head,
            FaultOp::Get => &self.get,
            FaultOp::Put => &self.put,
            FaultOp::Delete => &self.delete,
            FaultOp::List => &self.list,
            FaultOp::Initiate => &self.initiate,
            FaultOp::UploadPart => &self.upload_part,
            FaultOp::Complete => &self.complete,
            FaultOp::Abort => &self.abort,
        }
    }
}

/// In-memory `ObjectStorage` implementation.
pub struct MemoryBackend {
    objects: DashMap<String, StoredObject>,
    uploads: DashMap<String, PendingUpload>,
    next_upload: AtomicU64,
    counters: OpCounters,
    // (op, call number) pairs that should fail; 1-based call numbers.
    faults: Mutex<Vec<(FaultOp, u64)>>,
    min_part_size: usize,
    max_part_count: i32,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_limits(5 << 20, 10_000)
    }

    /// Create a backend with custom multipart limits, for tests that
    /// exercise part-count overflow without gigabytes of data.
    pub fn with_limits(min_part_size: usize, max_part_count: i32) -> Self {
        Self {
            objects: DashMap::new(),
            uploads: DashMap::new(),
            next_upload: AtomicU64::new(1),
            counters: OpCounters::default(),
            faults: Mutex::new(Vec::new()),
            min_part_size,
            max_part_count,
        }
    }

    /// Make the `nth` (1-based) future call of `op` fail.
    pub fn fail_nth(&self, op: FaultOp, nth: u64) {
        let already = self.counters.slot(op).load(Ordering::Relaxed);
        self.faults.lock().push((op, already + nth));
    }

    /// Number of calls made so far for `op`.
    pub fn op_count(&self, op: FaultOp) -> u64 {
        self.counters.slot(op).load(Ordering::Relaxed)
    }

    /// Whether an object with the given key exists.
    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    fn check(&self, op: FaultOp) -> Result<()> {
        let n = self.counters.bump(op);
        let mut faults = self.faults.lock();
        if let Some(pos) = faults.iter().position(|&(o, at)| o == op && at == n) {
            faults.remove(pos);
            return make_error_msg(
                BackendCode::FAULT_INJECTED,
                format!("injected fault on {:?} call {}", op, n),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for MemoryBackend {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn create(&self) -> Result<()> {
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Object> {
        self.check(FaultOp::Head)?;
        let obj = self.objects.get(key).ok_or_else(|| {
            driftfs_types::Status::with_message(
                BackendCode::NOT_FOUND,
                format!("no such object {}", key),
            )
        })?;
        Ok(Object {
            key: key.to_string(),
            size: obj.data.len() as i64,
            mtime: obj.mtime,
            is_dir: key.ends_with('/'),
            metadata: obj.metadata.clone(),
        })
    }

    async fn get(&self, key: &str, off: i64, limit: i64, buf: &mut [u8]) -> Result<usize> {
        self.check(FaultOp::Get)?;
        let obj = self.objects.get(key).ok_or_else(|| {
            driftfs_types::Status::with_message(
                BackendCode::NOT_FOUND,
                format!("no such object {}", key),
            )
        })?;
        let data = &obj.data;
        let start = (off.max(0) as usize).min(data.len());
        let mut end = data.len();
        if limit > 0 {
            end = end.min(start + limit as usize);
        }
        let n = (end - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    async fn put(&self, key: &str, metadata: Metadata, body: &[u8]) -> Result<()> {
        self.check(FaultOp::Put)?;
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data: body.to_vec(),
                metadata,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check(FaultOp::Delete)?;
        self.objects.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.check(FaultOp::Delete)?;
        let keys: Vec<String> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        for k in keys {
            self.objects.remove(&k);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Object>> {
        self.check(FaultOp::List)?;
        let mut out: Vec<Object> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| Object {
                key: e.key().clone(),
                size: e.value().data.len() as i64,
                mtime: e.value().mtime,
                is_dir: e.key().ends_with('/'),
                metadata: e.value().metadata.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn initiate_multipart(&self, key: &str) -> Result<MultipartUpload> {
        self.check(FaultOp::Initiate)?;
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::Relaxed));
        self.uploads.insert(
            id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(MultipartUpload {
            min_part_size: self.min_part_size,
            max_count: self.max_part_count,
            upload_id: id,
        })
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        num: i32,
        body: &[u8],
    ) -> Result<Part> {
        self.check(FaultOp::UploadPart)?;
        let mut upload = self.uploads.get_mut(upload_id).ok_or_else(|| {
            driftfs_types::Status::with_message(
                BackendCode::UPLOAD_NOT_FOUND,
                format!("no such upload {}", upload_id),
            )
        })?;
        upload.parts.insert(num, body.to_vec());
        Ok(Part {
            num,
            size: body.len(),
            etag: format!("etag-{}-{}", num, body.len()),
        })
    }

    async fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[Part]) -> Result<()> {
        self.check(FaultOp::Complete)?;
        let (_, upload) = self.uploads.remove(upload_id).ok_or_else(|| {
            driftfs_types::Status::with_message(
                BackendCode::UPLOAD_NOT_FOUND,
                format!("no such upload {}", upload_id),
            )
        })?;
        debug_assert_eq!(upload.key, key);
        let mut data = Vec::new();
        for part in parts {
            let body = upload.parts.get(&part.num).ok_or_else(|| {
                driftfs_types::Status::with_message(
                    BackendCode::MULTIPART_COMPLETE_FAILED,
                    format!("part {} was never uploaded", part.num),
                )
            })?;
            data.extend_from_slice(body);
        }
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata: Metadata::new(),
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.check(FaultOp::Abort)?;
        self.uploads.remove(upload_id);
        Ok(())
    }
}
