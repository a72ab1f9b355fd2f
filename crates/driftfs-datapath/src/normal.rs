//! Non-chunked data path: one multipart-assembled blob per file.
//!
//! [`NormalWriter`] accumulates the sequential byte stream into a 64 MiB
//! part buffer and uploads each full buffer as the next multipart part;
//! `flush` uploads the trailing part and completes the upload.
//! [`NormalReader`] serves reads out of a single sliding window filled by
//! ranged GETs.

use std::sync::Arc;

use driftfs_backend::{MultipartUpload, ObjectStorage, Part};
use driftfs_types::{
    make_error_msg,
    status_code::{status_code_t, DataCode},
    Result, Status,
};
use tracing::{debug, error};

use crate::reassembly::ReassemblyBuffer;
use crate::{FileReader, FileWriter, STREAM_CACHE_SIZE};

pub struct NormalWriter {
    key: String,
    backend: Arc<dyn ObjectStorage>,
    upload: Option<MultipartUpload>,
    parts: Vec<Part>,
    next_part: i32,
    buf: Vec<u8>,
    part_size: usize,
    reassembly: ReassemblyBuffer,
    error: Option<status_code_t>,
}

impl NormalWriter {
    pub fn new(key: &str, backend: Arc<dyn ObjectStorage>) -> Self {
        Self::with_part_size(key, backend, STREAM_CACHE_SIZE)
    }

    /// Custom part-buffer size, for tests that exercise part boundaries
    /// without writing gigabytes.
    pub fn with_part_size(key: &str, backend: Arc<dyn ObjectStorage>, part_size: usize) -> Self {
        Self {
            key: key.to_string(),
            backend,
            upload: None,
            parts: Vec::new(),
            next_part: 1,
            buf: Vec::with_capacity(part_size),
            part_size,
            reassembly: ReassemblyBuffer::new(),
            error: None,
        }
    }

    /// Copy sequential bytes into the part buffer, uploading a part
    /// whenever the next copy would overflow it.
    async fn ingest(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            if self.buf.len() + data.len() > self.part_size && !self.buf.is_empty() {
                self.upload_buffered_part().await?;
            }
            let take = data.len().min(self.part_size - self.buf.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
        }
        Ok(())
    }

    async fn upload_buffered_part(&mut self) -> Result<()> {
        let (upload_id, max_count) = match &self.upload {
            Some(u) => (u.upload_id.clone(), u.max_count),
            None => {
                self.error = Some(DataCode::UPLOAD_FAILED);
                return make_error_msg(DataCode::UPLOAD_FAILED, "no multipart upload in progress");
            }
        };
        if self.next_part > max_count {
            self.error = Some(DataCode::FILE_TOO_LARGE);
            return make_error_msg(
                DataCode::FILE_TOO_LARGE,
                format!("{}: part count would exceed {}", self.key, max_count),
            );
        }
        match self
            .backend
            .upload_part(&self.key, &upload_id, self.next_part, &self.buf)
            .await
        {
            Ok(part) => {
                debug!("uploaded part {} ({} bytes) of {}", part.num, part.size, self.key);
                self.parts.push(part);
                self.next_part += 1;
                self.buf.clear();
                Ok(())
            }
            Err(e) => {
                error!("upload part {} of {} failed: {}", self.next_part, self.key, e);
                self.error = Some(DataCode::UPLOAD_FAILED);
                make_error_msg(DataCode::UPLOAD_FAILED, e.describe())
            }
        }
    }
}

#[async_trait::async_trait]
impl FileWriter for NormalWriter {
    async fn write_at(&mut self, data: &[u8], off: i64) -> Result<usize> {
        if let Some(code) = self.error {
            return Err(Status::new(code));
        }

        // The first byte of the stream starts the multipart upload. A
        // repeated write at offset zero restarts the stream.
        if off == 0 {
            let upload = self.backend.initiate_multipart(&self.key).await?;
            self.upload = Some(upload);
            self.parts.clear();
            self.next_part = 1;
            self.buf.clear();
            self.reassembly.restart();
        }

        for seg in self.reassembly.push(off, data) {
            self.ingest(&seg).await?;
        }
        Ok(data.len())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(code) = self.error {
            if let Some(upload) = &self.upload {
                let _ = self
                    .backend
                    .abort_multipart(&self.key, &upload.upload_id)
                    .await;
            }
            return Err(Status::new(code));
        }

        if self.buf.is_empty() && self.reassembly.pending() == 0 {
            return Ok(());
        }

        for seg in self.reassembly.drain() {
            self.ingest(&seg).await?;
        }
        if !self.buf.is_empty() {
            self.upload_buffered_part().await?;
        }

        if let Some(upload) = &self.upload {
            let upload_id = upload.upload_id.clone();
            if let Err(e) = self
                .backend
                .complete_multipart(&self.key, &upload_id, &self.parts)
                .await
            {
                error!("complete multipart {} failed: {}", self.key, e);
                self.error = Some(DataCode::FLUSH_FAILED);
                return make_error_msg(DataCode::FLUSH_FAILED, e.describe());
            }
            self.parts.clear();
        }
        Ok(())
    }

    fn release(&mut self) {
        self.upload = None;
        self.parts.clear();
        self.next_part = 1;
        self.buf.clear();
        self.reassembly.reset();
        self.error = None;
    }
}

pub struct NormalReader {
    key: String,
    backend: Arc<dyn ObjectStorage>,
    size: i64,
    window_start: i64,
    window_end: i64,
    window: Vec<u8>,
    cache_size: usize,
    error: Option<status_code_t>,
}

impl NormalReader {
    pub fn new(key: &str, backend: Arc<dyn ObjectStorage>) -> Self {
        Self::with_cache_size(key, backend, STREAM_CACHE_SIZE)
    }

    /// Custom window size, for tests that exercise window sliding.
    pub fn with_cache_size(key: &str, backend: Arc<dyn ObjectStorage>, cache_size: usize) -> Self {
        Self {
            key: key.to_string(),
            backend,
            size: 0,
            window_start: 0,
            window_end: 0,
            window: vec![0; cache_size],
            cache_size,
            error: None,
        }
    }

    fn fail(&mut self, e: Status) -> Status {
        self.error = Some(e.code());
        e
    }
}

#[async_trait::async_trait]
impl FileReader for NormalReader {
    async fn read_at(&mut self, buf: &mut [u8], off: i64) -> Result<usize> {
        if let Some(code) = self.error {
            return Err(Status::new(code));
        }

        if off == 0 {
            let obj = match self.backend.head(&self.key).await {
                Ok(obj) => obj,
                Err(e) => {
                    error!("head {} failed: {}", self.key, e);
                    return Err(self.fail(e));
                }
            };
            self.size = obj.size;
        }

        // Past EOF the buffer content is undefined; callers cap read
        // lengths by the tracked file size.
        if off >= self.size {
            return Ok(buf.len());
        }

        let len = buf.len() as i64;
        if off + len > self.window_end {
            if self.window_end >= self.size && off >= self.window_start {
                // The window already reaches EOF; hand back its tail.
                let start = (off - self.window_start) as usize;
                let avail = (self.window_end - off) as usize;
                buf[..avail].copy_from_slice(&self.window[start..start + avail]);
                return Ok(buf.len());
            }
            if self.window_end < self.size {
                // Slide forward by one window.
                let n = match self
                    .backend
                    .get(
                        &self.key,
                        self.window_end,
                        self.cache_size as i64,
                        &mut self.window,
                    )
                    .await
                {
                    Ok(n) => n,
                    Err(e) => {
                        error!("read window of {} failed: {}", self.key, e);
                        return Err(self.fail(e));
                    }
                };
                self.window_start = self.window_end;
                self.window_end += n as i64;
            }
        }

        if off >= self.window_start && off + len <= self.window_end {
            let start = (off - self.window_start) as usize;
            buf.copy_from_slice(&self.window[start..start + buf.len()]);
            return Ok(buf.len());
        }

        // Request does not fit the window; fetch it directly.
        if let Err(e) = self.backend.get(&self.key, off, len, buf).await {
            error!("read {} failed: {}", self.key, e);
            return Err(self.fail(e));
        }
        Ok(buf.len())
    }

    fn release(&mut self) {
        self.size = 0;
        self.window_start = 0;
        self.window_end = 0;
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftfs_backend::{memory::FaultOp, MemoryBackend, Metadata};

    fn backend() -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::new())
    }

    async fn read_all(backend: &MemoryBackend, key: &str, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        let n = backend.get(key, 0, 0, &mut buf).await.unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn test_out_of_order_write_read() {
        let b = backend();
        let mut w = NormalWriter::new("f", b.clone());

        // Second half first, then the first half.
        let mut expect = Vec::new();
        expect.extend_from_slice(&[b'A'; 100]);
        expect.extend_from_slice(&[b'B'; 50]);
        w.write_at(&[b'B'; 50], 100).await.unwrap();
        w.write_at(&[b'A'; 100], 0).await.unwrap();
        w.flush().await.unwrap();

        assert_eq!(read_all(&b, "f", 200).await, expect);

        let mut r = NormalReader::new("f", b.clone());
        let mut buf = vec![0u8; 150];
        let n = r.read_at(&mut buf, 0).await.unwrap();
        assert_eq!(n, 150);
        assert_eq!(buf, expect);
    }

    #[tokio::test]
    async fn test_out_of_order_halves() {
        let b = backend();
        let mut w = NormalWriter::new("f", b.clone());

        let first = vec![1u8; 64 << 10];
        let second = vec![2u8; 64 << 10];
        w.write_at(&second, 64 << 10).await.unwrap();
        w.write_at(&first, 0).await.unwrap();
        w.flush().await.unwrap();

        let data = read_all(&b, "f", 128 << 10).await;
        assert_eq!(&data[..64 << 10], &first[..]);
        assert_eq!(&data[64 << 10..], &second[..]);
    }

    #[tokio::test]
    async fn test_part_boundaries() {
        let b = Arc::new(MemoryBackend::with_limits(16, 10_000));
        let mut w = NormalWriter::with_part_size("f", b.clone(), 1024);

        let data: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        w.write_at(&data[..1500], 0).await.unwrap();
        w.write_at(&data[1500..], 1500).await.unwrap();
        w.flush().await.unwrap();

        assert_eq!(read_all(&b, "f", 4096).await, data);
        // Every uploaded part stayed within the buffer size.
        assert!(b.op_count(FaultOp::UploadPart) >= 3);
    }

    #[tokio::test]
    async fn test_flush_without_writes_is_noop() {
        let b = backend();
        let mut w = NormalWriter::new("f", b.clone());
        w.flush().await.unwrap();
        assert_eq!(b.op_count(FaultOp::Complete), 0);
        assert!(!b.contains("f"));
    }

    #[tokio::test]
    async fn test_file_too_large() {
        let b = Arc::new(MemoryBackend::with_limits(1, 2));
        let mut w = NormalWriter::with_part_size("f", b.clone(), 64);

        let data = vec![0u8; 64 * 4];
        let err = w.write_at(&data, 0).await.unwrap_err();
        assert_eq!(err.code(), DataCode::FILE_TOO_LARGE);

        // The error sticks.
        let err = w.write_at(&[1], data.len() as i64).await.unwrap_err();
        assert_eq!(err.code(), DataCode::FILE_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_sticky_upload_error() {
        let b = Arc::new(MemoryBackend::with_limits(1, 10_000));
        b.fail_nth(FaultOp::UploadPart, 3);
        let mut w = NormalWriter::with_part_size("f", b.clone(), 64);

        let mut result = Ok(0);
        let mut off = 0i64;
        for _ in 0..8 {
            result = w.write_at(&[7u8; 64], off).await;
            off += 64;
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result.unwrap_err().code(), DataCode::UPLOAD_FAILED);

        // Subsequent writes fail without touching the backend.
        let parts_before = b.op_count(FaultOp::UploadPart);
        let err = w.write_at(&[7u8; 64], off).await.unwrap_err();
        assert_eq!(err.code(), DataCode::UPLOAD_FAILED);
        assert_eq!(b.op_count(FaultOp::UploadPart), parts_before);

        // Flush aborts the multipart upload and reports the error.
        let err = w.flush().await.unwrap_err();
        assert_eq!(err.code(), DataCode::UPLOAD_FAILED);
        assert_eq!(b.op_count(FaultOp::Abort), 1);
    }

    #[tokio::test]
    async fn test_release_clears_error() {
        let b = Arc::new(MemoryBackend::with_limits(1, 10_000));
        b.fail_nth(FaultOp::Initiate, 1);
        let mut w = NormalWriter::with_part_size("f", b.clone(), 64);

        assert!(w.write_at(&[1], 0).await.is_err());
        w.release();
        // After release the writer starts clean.
        w.write_at(&[1], 0).await.unwrap();
        w.flush().await.unwrap();
        assert_eq!(read_all(&b, "f", 8).await, vec![1]);
    }

    #[tokio::test]
    async fn test_reader_window_reuse() {
        let b = backend();
        let data: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        b.put("f", Metadata::new(), &data).await.unwrap();

        let mut r = NormalReader::with_cache_size("f", b.clone(), 16);
        let mut buf = [0u8; 8];

        r.read_at(&mut buf, 0).await.unwrap();
        assert_eq!(&buf, &data[0..8]);
        let gets = b.op_count(FaultOp::Get);

        // Second read of the same window issues no further GET.
        r.read_at(&mut buf, 8).await.unwrap();
        assert_eq!(&buf, &data[8..16]);
        assert_eq!(b.op_count(FaultOp::Get), gets);

        // Next window slides forward.
        r.read_at(&mut buf, 16).await.unwrap();
        assert_eq!(&buf, &data[16..24]);
        assert_eq!(b.op_count(FaultOp::Get), gets + 1);
    }

    #[tokio::test]
    async fn test_reader_fallback_get() {
        let b = backend();
        let data: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        b.put("f", Metadata::new(), &data).await.unwrap();

        let mut r = NormalReader::with_cache_size("f", b.clone(), 16);
        let mut buf = [0u8; 8];
        r.read_at(&mut buf, 0).await.unwrap();

        // A jump far ahead outruns one window slide and falls back to a
        // direct GET of exactly the requested range.
        r.read_at(&mut buf, 48).await.unwrap();
        assert_eq!(&buf, &data[48..56]);
    }

    #[tokio::test]
    async fn test_reader_eof_reports_full_buffer() {
        let b = backend();
        b.put("f", Metadata::new(), b"abc").await.unwrap();

        let mut r = NormalReader::new("f", b.clone());
        let mut buf = [0u8; 8];
        // Prime size.
        let n = r.read_at(&mut buf, 0).await.unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf[..3], b"abc");

        let gets = b.op_count(FaultOp::Get);
        let n = r.read_at(&mut buf, 100).await.unwrap();
        assert_eq!(n, 8);
        assert_eq!(b.op_count(FaultOp::Get), gets);
    }

    #[tokio::test]
    async fn test_reader_sticky_error() {
        let b = backend();
        b.fail_nth(FaultOp::Head, 1);
        let mut r = NormalReader::new("missing", b.clone());
        let mut buf = [0u8; 4];
        assert!(r.read_at(&mut buf, 0).await.is_err());

        let heads = b.op_count(FaultOp::Head);
        assert!(r.read_at(&mut buf, 0).await.is_err());
        assert_eq!(b.op_count(FaultOp::Head), heads);
    }
}
