//! Chunked data path: files stored as content-addressed chunk objects
//! plus a JSON manifest.
//!
//! The writer accumulates the sequential stream, cuts it into chunks
//! (fixed 8 MiB boundaries or content-defined ones), optionally
//! compresses each chunk, hashes the stored bytes, probes the backend for
//! an identical object at the same index, and uploads. `flush` commits
//! the trailing chunk and the manifest. The reader locates chunks through
//! the manifest and serves ranges out of a two-slot decoded cache.

use std::sync::Arc;

use driftfs_backend::{Metadata, ObjectStorage};
use driftfs_types::{
    make_error_msg,
    status_code::{status_code_t, DataCode},
    Result, Status,
};
use tracing::{debug, error};

use crate::chunker::RabinChunker;
use crate::codec::{self, Codec};
use crate::manifest::{chunk_key, manifest_key, ChunkDigest, Manifest};
use crate::reassembly::ReassemblyBuffer;
use crate::{
    FileReader, FileWriter, CHUNK_ID_KEY, DYNAMIC_BUF_SIZE, DYNAMIC_READ_SIZE, FIXED_CHUNK_SIZE,
    MIN_DYNAMIC_CHUNK,
};

/// Largest manifest the reader will fetch.
const MANIFEST_FETCH_LIMIT: usize = 1 << 20;

pub struct ChunkWriter {
    key: String,
    backend: Arc<dyn ObjectStorage>,
    codec: Option<Arc<dyn Codec>>,
    fixed: bool,
    chunk_cap: usize,
    chunker: Option<RabinChunker>,
    buf: Vec<u8>,
    // Total logical bytes ingested; the manifest end of the chunk being
    // buffered.
    offset: i64,
    manifest: Manifest,
    reassembly: ReassemblyBuffer,
    // Chunks committed since the manifest was last persisted.
    dirty: bool,
    error: Option<status_code_t>,
}

impl ChunkWriter {
    pub fn new(
        key: &str,
        backend: Arc<dyn ObjectStorage>,
        codec: Option<Arc<dyn Codec>>,
        fixed: bool,
    ) -> Self {
        if fixed {
            Self::with_geometry(key, backend, codec, true, FIXED_CHUNK_SIZE, 0, 0, 0)
        } else {
            Self::with_geometry(
                key,
                backend,
                codec,
                false,
                DYNAMIC_BUF_SIZE,
                MIN_DYNAMIC_CHUNK,
                DYNAMIC_READ_SIZE,
                crate::chunker::CHUNKER_AVERAGE_BITS,
            )
        }
    }

    /// Custom buffer and chunker geometry, for tests that exercise chunk
    /// boundaries with small data.
    #[allow(clippy::too_many_arguments)]
    pub fn with_geometry(
        key: &str,
        backend: Arc<dyn ObjectStorage>,
        codec: Option<Arc<dyn Codec>>,
        fixed: bool,
        chunk_cap: usize,
        min_chunk: usize,
        max_chunk: usize,
        average_bits: u32,
    ) -> Self {
        let chunker = if fixed {
            None
        } else {
            Some(RabinChunker::with_average_bits(
                min_chunk,
                max_chunk,
                average_bits,
            ))
        };
        Self {
            key: key.to_string(),
            backend,
            codec,
            fixed,
            chunk_cap,
            chunker,
            buf: Vec::with_capacity(chunk_cap),
            offset: 0,
            manifest: Manifest::new(),
            reassembly: ReassemblyBuffer::new(),
            dirty: false,
            error: None,
        }
    }

    async fn ingest(&mut self, data: &[u8]) -> Result<()> {
        if self.fixed {
            self.ingest_fixed(data).await
        } else {
            self.ingest_dynamic(data).await
        }
    }

    /// Fixed mode: fill the buffer to exactly `chunk_cap`, emit, repeat.
    /// Bytes straddling a boundary complete the current chunk and start
    /// the next one within the same call.
    async fn ingest_fixed(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let take = data.len().min(self.chunk_cap - self.buf.len());
            self.buf.extend_from_slice(&data[..take]);
            self.offset += take as i64;
            data = &data[take..];
            if self.buf.len() == self.chunk_cap {
                self.emit_buffered().await?;
            }
        }
        Ok(())
    }

    /// Dynamic mode: accumulate until the next append would overflow,
    /// then run the content-defined chunker over the whole buffer and
    /// commit every cut, final short piece included.
    async fn ingest_dynamic(&mut self, mut data: &[u8]) -> Result<()> {
        while self.buf.len() + data.len() > self.chunk_cap {
            self.emit_dynamic().await?;
            let take = data.len().min(self.chunk_cap);
            self.buf.extend_from_slice(&data[..take]);
            self.offset += take as i64;
            data = &data[take..];
        }
        self.buf.extend_from_slice(data);
        self.offset += data.len() as i64;
        Ok(())
    }

    /// Emit the buffered bytes as one chunk (fixed mode, and the trailing
    /// partial chunk at flush).
    async fn emit_buffered(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let buffered = std::mem::take(&mut self.buf);
        let result = self.upload_chunk(&buffered, self.offset).await;
        self.buf = buffered;
        self.buf.clear();
        result
    }

    /// Run the chunker over the buffered bytes and commit every cut.
    async fn emit_dynamic(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let buffered = std::mem::take(&mut self.buf);
        let cuts: Vec<usize> = self
            .chunker
            .as_mut()
            .expect("dynamic writer has a chunker")
            .split(&buffered)
            .iter()
            .map(|c| c.len())
            .collect();

        let mut start = 0usize;
        let mut cut_end = self.offset - buffered.len() as i64;
        for len in cuts {
            cut_end += len as i64;
            if let Err(e) = self.upload_chunk(&buffered[start..start + len], cut_end).await {
                return Err(e);
            }
            start += len;
        }
        self.buf = buffered;
        self.buf.clear();
        Ok(())
    }

    /// Compress, hash, dedup-probe and PUT one chunk, then record it in
    /// the manifest with logical end `end`.
    async fn upload_chunk(&mut self, data: &[u8], end: i64) -> Result<()> {
        let index = self.manifest.next_index();
        let key = chunk_key(&self.key, index);

        let compressed = match self.codec.clone() {
            Some(codec) => match codec::compress_to_vec(codec.as_ref(), data) {
                Ok(out) => Some(out),
                Err(e) => {
                    error!("compress chunk {} failed: {}", key, e);
                    self.error = Some(DataCode::CODEC_ERROR);
                    return Err(e);
                }
            },
            None => None,
        };
        let stored: &[u8] = compressed.as_deref().unwrap_or(data);
        let compress_size = if compressed.is_some() {
            stored.len() as i64
        } else {
            0
        };
        let digest = ChunkDigest::of(stored);

        if !self.probe_duplicate(&key, &digest).await {
            let mut metadata = Metadata::new();
            metadata.insert(CHUNK_ID_KEY.to_string(), digest.to_string());
            if let Err(e) = self.backend.put(&key, metadata, stored).await {
                error!("upload chunk {} failed: {}", key, e);
                self.error = Some(DataCode::UPLOAD_FAILED);
                return make_error_msg(DataCode::UPLOAD_FAILED, e.describe());
            }
        }

        self.manifest.commit(end, compress_size);
        self.dirty = true;
        Ok(())
    }

    /// HEAD the chunk's slot; a matching `chunkid` means the PUT can be
    /// skipped. Probe failures are treated as "not present".
    async fn probe_duplicate(&self, key: &str, digest: &ChunkDigest) -> bool {
        let obj = match self.backend.head(key).await {
            Ok(obj) => obj,
            Err(_) => return false,
        };
        let want = digest.to_string();
        for (k, v) in &obj.metadata {
            if k.eq_ignore_ascii_case(CHUNK_ID_KEY) && *v == want {
                debug!("chunk {} already stored with matching id", key);
                return true;
            }
        }
        false
    }
}

#[async_trait::async_trait]
impl FileWriter for ChunkWriter {
    async fn write_at(&mut self, data: &[u8], off: i64) -> Result<usize> {
        if let Some(code) = self.error {
            return Err(Status::new(code));
        }
        for seg in self.reassembly.push(off, data) {
            self.ingest(&seg).await?;
        }
        Ok(data.len())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(code) = self.error {
            return Err(Status::new(code));
        }
        if !self.dirty && self.buf.is_empty() && self.reassembly.pending() == 0 {
            return Ok(());
        }

        for seg in self.reassembly.drain() {
            self.ingest(&seg).await?;
        }
        if !self.buf.is_empty() {
            if self.fixed {
                self.emit_buffered().await?;
            } else {
                self.emit_dynamic().await?;
            }
        }

        let json = self.manifest.to_json()?;
        if let Err(e) = self
            .backend
            .put(&manifest_key(&self.key), Metadata::new(), &json)
            .await
        {
            error!("write manifest for {} failed: {}", self.key, e);
            self.error = Some(DataCode::FLUSH_FAILED);
            return make_error_msg(DataCode::FLUSH_FAILED, e.describe());
        }
        self.dirty = false;
        Ok(())
    }

    fn release(&mut self) {
        self.buf.clear();
        self.offset = 0;
        self.manifest = Manifest::new();
        self.reassembly.reset();
        self.dirty = false;
        self.error = None;
    }
}

#[derive(Debug, Default)]
struct CacheSlot {
    buf: Vec<u8>,
    start: i64,
    end: i64,
}

impl CacheSlot {
    fn sized(cap: usize) -> Self {
        Self {
            buf: vec![0; cap],
            start: 0,
            end: 0,
        }
    }

    fn contains(&self, off: i64, len: i64) -> bool {
        off >= self.start && off + len <= self.end
    }

    fn copy_out(&self, buf: &mut [u8], off: i64) {
        let rel = (off - self.start) as usize;
        buf.copy_from_slice(&self.buf[rel..rel + buf.len()]);
    }
}

pub struct ChunkReader {
    key: String,
    backend: Arc<dyn ObjectStorage>,
    codec: Option<Arc<dyn Codec>>,
    manifest: Option<Manifest>,
    first_slot: CacheSlot,
    second_slot: CacheSlot,
    // Compressed-bytes staging buffer; grows to the largest compress_size
    // seen and never shrinks.
    scratch: Vec<u8>,
    error: Option<status_code_t>,
}

impl ChunkReader {
    pub fn new(
        key: &str,
        backend: Arc<dyn ObjectStorage>,
        codec: Option<Arc<dyn Codec>>,
        fixed: bool,
    ) -> Self {
        let cap = if fixed {
            FIXED_CHUNK_SIZE
        } else {
            DYNAMIC_READ_SIZE
        };
        Self::with_slot_size(key, backend, codec, cap)
    }

    /// Custom slot size, for tests with small chunks. The slot must hold
    /// the largest decoded chunk.
    pub fn with_slot_size(
        key: &str,
        backend: Arc<dyn ObjectStorage>,
        codec: Option<Arc<dyn Codec>>,
        slot_size: usize,
    ) -> Self {
        Self {
            key: key.to_string(),
            backend,
            codec,
            manifest: None,
            first_slot: CacheSlot::sized(slot_size),
            second_slot: CacheSlot::sized(slot_size),
            scratch: Vec::new(),
            error: None,
        }
    }

    async fn load_manifest(&mut self) -> Result<()> {
        let mut raw = vec![0u8; MANIFEST_FETCH_LIMIT];
        let n = self
            .backend
            .get(&manifest_key(&self.key), 0, 0, &mut raw)
            .await?;
        self.manifest = Some(Manifest::from_slice(&raw[..n])?);
        Ok(())
    }

    /// Fetch the chunk at manifest position `pos` into a slot, undoing
    /// compression if the chunk was stored compressed.
    async fn download_chunk(&mut self, pos: usize, into_second: bool) -> Result<()> {
        let (start, end, csize) = {
            let m = self.manifest.as_ref().expect("manifest is loaded");
            let (start, end) = m.bounds(pos);
            (start, end, m.compress_size(pos))
        };
        // A record's index equals its position, checked at manifest load.
        let key = chunk_key(&self.key, pos as u32);
        let slot = if into_second {
            &mut self.second_slot
        } else {
            &mut self.first_slot
        };

        match self.codec.clone() {
            // The manifest field is consulted as well: a zero
            // compress_size marks a chunk stored raw even when the mount
            // has a codec configured.
            Some(codec) if csize > 0 => {
                if self.scratch.len() < csize as usize {
                    self.scratch.resize(csize as usize, 0);
                }
                self.backend
                    .get(&key, 0, 0, &mut self.scratch[..csize as usize])
                    .await?;
                codec.decompress(&mut slot.buf, &self.scratch[..csize as usize])?;
            }
            _ => {
                self.backend.get(&key, 0, 0, &mut slot.buf).await?;
            }
        }

        slot.start = start;
        slot.end = end;
        Ok(())
    }

    fn fail(&mut self, e: Status) -> Status {
        self.error = Some(e.code());
        e
    }
}

#[async_trait::async_trait]
impl FileReader for ChunkReader {
    async fn read_at(&mut self, buf: &mut [u8], off: i64) -> Result<usize> {
        if let Some(code) = self.error {
            return Err(Status::new(code));
        }

        if off == 0 {
            if let Err(e) = self.load_manifest().await {
                error!("load manifest for {} failed: {}", self.key, e);
                return Err(self.fail(e));
            }
        }
        if self.manifest.is_none() {
            let e = Status::with_message(
                DataCode::MANIFEST_CORRUPT,
                format!("{}: read before manifest load", self.key),
            );
            return Err(self.fail(e));
        }

        let len = buf.len() as i64;

        if self.first_slot.contains(off, len) {
            self.first_slot.copy_out(buf, off);
            return Ok(buf.len());
        }
        if self.second_slot.contains(off, len) {
            self.second_slot.copy_out(buf, off);
            return Ok(buf.len());
        }

        let (first, second) = self
            .manifest
            .as_ref()
            .expect("manifest is loaded")
            .locate(off, len);
        let first = match first {
            Some(i) => i,
            None => {
                error!("{}: no chunk covers offset {}", self.key, off);
                let e = Status::with_message(
                    DataCode::MANIFEST_CORRUPT,
                    format!("{}: no chunk covers offset {}", self.key, off),
                );
                return Err(self.fail(e));
            }
        };

        if let Err(e) = self.download_chunk(first, false).await {
            return Err(self.fail(e));
        }
        let second = match second {
            Some(s) => s,
            None => {
                self.first_slot.copy_out(buf, off);
                return Ok(buf.len());
            }
        };

        if let Err(e) = self.download_chunk(second, true).await {
            return Err(self.fail(e));
        }

        // Stitch: tail of the first chunk, head of the second.
        let a = &self.first_slot;
        let b = &self.second_slot;
        let head = (a.end - off) as usize;
        let rel = (off - a.start) as usize;
        buf[..head].copy_from_slice(&a.buf[rel..rel + head]);
        let tail = (buf.len() - head).min((b.end - b.start) as usize);
        buf[head..head + tail].copy_from_slice(&b.buf[..tail]);
        Ok(buf.len())
    }

    fn release(&mut self) {
        self.manifest = None;
        self.first_slot.start = 0;
        self.first_slot.end = 0;
        self.second_slot.start = 0;
        self.second_slot.end = 0;
        self.error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::codec_for;
    use driftfs_backend::{memory::FaultOp, MemoryBackend, Metadata};

    const CAP: usize = 1 << 20; // 1 MiB chunks for tests

    fn backend() -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::new())
    }

    fn fixed_writer(b: Arc<MemoryBackend>, codec: Option<Arc<dyn Codec>>) -> ChunkWriter {
        ChunkWriter::with_geometry("f", b, codec, true, CAP, 0, 0, 0)
    }

    fn reader(b: Arc<MemoryBackend>, codec: Option<Arc<dyn Codec>>) -> ChunkReader {
        ChunkReader::with_slot_size("f", b, codec, CAP)
    }

    fn pattern(len: usize) -> Vec<u8> {
        b"abcdef".iter().cycle().take(len).copied().collect()
    }

    fn random_bytes(len: usize, mut seed: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            out.extend_from_slice(&seed.to_le_bytes());
        }
        out.truncate(len);
        out
    }

    async fn stored_manifest(b: &MemoryBackend) -> Manifest {
        let mut raw = vec![0u8; 1 << 20];
        let n = b.get("f/.meta", 0, 0, &mut raw).await.unwrap();
        Manifest::from_slice(&raw[..n]).unwrap()
    }

    #[tokio::test]
    async fn test_fixed_roundtrip() {
        let b = backend();
        let data = pattern(CAP * 2 + CAP / 2);

        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&data, 0).await.unwrap();
        w.flush().await.unwrap();

        let m = stored_manifest(&b).await;
        assert_eq!(m.logical_size(), data.len() as i64);

        let mut r = reader(b, None);
        let mut buf = vec![0u8; data.len()];
        r.read_at(&mut buf, 0).await.unwrap();
        assert_eq!(buf[..CAP], data[..CAP]);

        // Range read across the middle.
        let mut buf = vec![0u8; 1000];
        r.read_at(&mut buf, (CAP + CAP / 2) as i64).await.unwrap();
        assert_eq!(buf, data[CAP + CAP / 2..CAP + CAP / 2 + 1000]);
    }

    #[tokio::test]
    async fn test_fixed_manifest_layout_and_same_hash() {
        let b = backend();
        // 2.5 chunks of zeroes: chunks 0 and 1 carry identical content but
        // both PUTs are issued (dedup is per index).
        let data = vec![0u8; CAP * 2 + CAP / 2];

        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&data, 0).await.unwrap();
        w.flush().await.unwrap();

        let m = stored_manifest(&b).await;
        let records: Vec<_> = m.records().iter().filter(|r| !r.is_sentinel()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!((records[0].start, records[0].end), (0, CAP as i64));
        assert_eq!((records[1].start, records[1].end), (CAP as i64, 2 * CAP as i64));
        assert_eq!(
            (records[2].start, records[2].end),
            (2 * CAP as i64, data.len() as i64)
        );
        // Uncompressed: compress_size stays zero.
        assert!(records.iter().all(|r| r.compress_size == 0));

        assert!(b.contains("f/0"));
        assert!(b.contains("f/1"));
        assert!(b.contains("f/2"));
        let id0 = b.head("f/0").await.unwrap().metadata["chunkid"].clone();
        let id1 = b.head("f/1").await.unwrap().metadata["chunkid"].clone();
        let id2 = b.head("f/2").await.unwrap().metadata["chunkid"].clone();
        assert_eq!(id0, id1);
        assert_ne!(id0, id2);
    }

    #[tokio::test]
    async fn test_dedup_skips_put_on_rewrite() {
        let b = backend();
        let data = pattern(CAP * 2 + 123);

        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&data, 0).await.unwrap();
        w.flush().await.unwrap();
        let puts_first = b.op_count(FaultOp::Put);

        // Same bytes to the same key after reopen: every chunk HEAD
        // matches, so only the manifest is PUT again.
        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&data, 0).await.unwrap();
        w.flush().await.unwrap();
        assert_eq!(b.op_count(FaultOp::Put), puts_first + 1);
    }

    #[tokio::test]
    async fn test_dedup_reuploads_changed_content() {
        let b = backend();
        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&pattern(CAP + 100), 0).await.unwrap();
        w.flush().await.unwrap();
        let puts_first = b.op_count(FaultOp::Put);

        let mut w = fixed_writer(b.clone(), None);
        let changed = random_bytes(CAP + 100, 5);
        w.write_at(&changed, 0).await.unwrap();
        w.flush().await.unwrap();
        // Both chunks differ, so 2 chunk PUTs + 1 manifest PUT.
        assert_eq!(b.op_count(FaultOp::Put), puts_first + 3);
    }

    #[tokio::test]
    async fn test_out_of_order_chunked() {
        let b = backend();
        let first = random_bytes(64 << 10, 1);
        let second = random_bytes(64 << 10, 2);

        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&second, 64 << 10).await.unwrap();
        w.write_at(&first, 0).await.unwrap();
        w.flush().await.unwrap();

        let mut r = reader(b, None);
        let mut buf = vec![0u8; 128 << 10];
        r.read_at(&mut buf, 0).await.unwrap();
        assert_eq!(&buf[..64 << 10], &first[..]);
        assert_eq!(&buf[64 << 10..], &second[..]);
    }

    #[tokio::test]
    async fn test_straddle_read() {
        let b = backend();
        // Three 1 MiB chunks; read 1.5 MiB starting at 0.5 MiB.
        let data = random_bytes(3 * CAP, 11);
        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&data, 0).await.unwrap();
        w.flush().await.unwrap();

        let mut r = reader(b, None);
        let mut buf = vec![0u8; CAP + CAP / 2];
        // Prime manifest with a zero-offset read first.
        let mut head = vec![0u8; 16];
        r.read_at(&mut head, 0).await.unwrap();

        r.read_at(&mut buf, (CAP / 2) as i64).await.unwrap();
        assert_eq!(buf[..], data[CAP / 2..2 * CAP]);
    }

    #[tokio::test]
    async fn test_read_cache_reuse() {
        let b = backend();
        let data = random_bytes(3 * CAP, 21);
        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&data, 0).await.unwrap();
        w.flush().await.unwrap();

        let gets_before = b.op_count(FaultOp::Get);
        let mut r = reader(b.clone(), None);
        let step = 256 << 10;
        let mut buf = vec![0u8; step];
        let mut off = 0usize;
        while off < 3 * CAP {
            r.read_at(&mut buf, off as i64).await.unwrap();
            assert_eq!(buf[..], data[off..off + step]);
            off += step;
        }
        // One manifest GET plus one GET per chunk.
        assert_eq!(b.op_count(FaultOp::Get), gets_before + 4);
    }

    #[tokio::test]
    async fn test_compression_roundtrip_all_codecs() {
        for name in ["zstd", "lz4", "snappy"] {
            let b = backend();
            let codec = codec_for(name);
            let data = pattern(CAP * 2 + 777);

            let mut w = fixed_writer(b.clone(), codec.clone());
            w.write_at(&data, 0).await.unwrap();
            w.flush().await.unwrap();

            let m = stored_manifest(&b).await;
            for rec in m.records().iter().filter(|r| !r.is_sentinel()) {
                assert!(rec.compress_size > 0, "{}", name);
                assert!(
                    rec.compress_size < rec.end - rec.start,
                    "{}: pattern data must shrink",
                    name
                );
            }

            let mut r = reader(b, codec);
            let mut buf = vec![0u8; 4096];
            r.read_at(&mut buf, 0).await.unwrap();
            assert_eq!(buf[..], data[..4096], "{}", name);

            let mut buf = vec![0u8; CAP];
            r.read_at(&mut buf, (CAP / 2) as i64).await.unwrap();
            assert_eq!(buf[..], data[CAP / 2..CAP / 2 + CAP], "{}", name);
        }
    }

    #[tokio::test]
    async fn test_dynamic_roundtrip() {
        let b = backend();
        let min = 8 << 10;
        let max = 32 << 10;
        let mut w =
            ChunkWriter::with_geometry("f", b.clone(), None, false, 256 << 10, min, max, 13);
        let data = random_bytes(600 << 10, 77);
        // Feed in uneven slices to cross the accumulation buffer a few
        // times.
        let mut off = 0usize;
        for piece in data.chunks(100 << 10) {
            w.write_at(piece, off as i64).await.unwrap();
            off += piece.len();
        }
        w.flush().await.unwrap();

        let m = stored_manifest(&b).await;
        let records: Vec<_> = m.records().iter().filter(|r| !r.is_sentinel()).collect();
        assert!(records.len() > 1);
        assert_eq!(m.logical_size(), data.len() as i64);
        m.validate().unwrap();
        for rec in &records {
            assert!((rec.end - rec.start) as usize <= max);
        }

        // Read back record by record (each fits one slot), plus one read
        // straddling the first boundary.
        let mut r = ChunkReader::with_slot_size("f", b, None, max);
        for rec in &records {
            let len = (rec.end - rec.start) as usize;
            let mut buf = vec![0u8; len];
            r.read_at(&mut buf, rec.start).await.unwrap();
            assert_eq!(buf[..], data[rec.start as usize..rec.end as usize]);
        }
        let boundary = records[0].end;
        let mut buf = vec![0u8; 200];
        r.read_at(&mut buf, boundary - 100).await.unwrap();
        assert_eq!(
            buf[..],
            data[(boundary - 100) as usize..(boundary + 100) as usize]
        );
    }

    #[tokio::test]
    async fn test_fixed_production_chunk_size() {
        let b = backend();
        // 20 MiB of zeroes with the real 8 MiB chunk size.
        let data = vec![0u8; 20 << 20];
        let mut w = ChunkWriter::new("f", b.clone(), None, true);
        let mut off = 0usize;
        for piece in data.chunks(1 << 20) {
            w.write_at(piece, off as i64).await.unwrap();
            off += piece.len();
        }
        w.flush().await.unwrap();

        let m = stored_manifest(&b).await;
        let records: Vec<_> = m.records().iter().filter(|r| !r.is_sentinel()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!((records[0].start, records[0].end), (0, 8 << 20));
        assert_eq!((records[1].start, records[1].end), (8 << 20, 16 << 20));
        assert_eq!((records[2].start, records[2].end), (16 << 20, 20 << 20));

        let id0 = b.head("f/0").await.unwrap().metadata["chunkid"].clone();
        let id1 = b.head("f/1").await.unwrap().metadata["chunkid"].clone();
        assert_eq!(id0, id1);
    }

    #[tokio::test]
    async fn test_dynamic_production_scale_with_zstd() {
        let b = backend();
        // 32 MiB of a repeating pattern through the real dynamic geometry;
        // the cut sequence is deterministic for the fixed polynomial.
        let data = pattern(32 << 20);
        let codec = codec_for("zstd");
        let mut w = ChunkWriter::new("f", b.clone(), codec.clone(), false);
        let mut off = 0usize;
        for piece in data.chunks(1 << 20) {
            w.write_at(piece, off as i64).await.unwrap();
            off += piece.len();
        }
        w.flush().await.unwrap();

        let m = stored_manifest(&b).await;
        m.validate().unwrap();
        assert_eq!(m.logical_size(), data.len() as i64);
        let records: Vec<_> = m.records().iter().filter(|r| !r.is_sentinel()).collect();
        assert!(records.len() >= 2);
        for rec in &records {
            assert!((rec.end - rec.start) as usize <= DYNAMIC_READ_SIZE);
            assert!(rec.compress_size > 0);
            assert!(rec.compress_size < rec.end - rec.start);
        }

        let mut r = ChunkReader::new("f", b, codec, false);
        let mut buf = vec![0u8; 128 << 10];
        r.read_at(&mut buf, 0).await.unwrap();
        assert_eq!(buf[..], data[..128 << 10]);
        let probe = records[0].end - (64 << 10);
        r.read_at(&mut buf, probe).await.unwrap();
        assert_eq!(
            buf[..],
            data[probe as usize..probe as usize + (128 << 10)]
        );
    }

    #[tokio::test]
    async fn test_sticky_error_on_chunk_put() {
        let b = backend();
        b.fail_nth(FaultOp::Put, 1);
        let mut w = fixed_writer(b.clone(), None);

        let err = w.write_at(&pattern(CAP), 0).await.unwrap_err();
        assert_eq!(err.code(), DataCode::UPLOAD_FAILED);

        let (heads, puts) = (b.op_count(FaultOp::Head), b.op_count(FaultOp::Put));
        let err = w.write_at(&pattern(16), CAP as i64).await.unwrap_err();
        assert_eq!(err.code(), DataCode::UPLOAD_FAILED);
        assert_eq!(b.op_count(FaultOp::Head), heads);
        assert_eq!(b.op_count(FaultOp::Put), puts);

        let err = w.flush().await.unwrap_err();
        assert_eq!(err.code(), DataCode::UPLOAD_FAILED);
    }

    #[tokio::test]
    async fn test_exact_chunk_multiple_still_writes_manifest() {
        let b = backend();
        let data = random_bytes(2 * CAP, 9);
        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&data, 0).await.unwrap();
        w.flush().await.unwrap();

        let m = stored_manifest(&b).await;
        assert_eq!(m.logical_size(), 2 * CAP as i64);
    }

    #[tokio::test]
    async fn test_repeated_flush_writes_manifest_once() {
        let b = backend();
        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&pattern(1000), 0).await.unwrap();
        w.flush().await.unwrap();

        let puts = b.op_count(FaultOp::Put);
        w.flush().await.unwrap();
        assert_eq!(b.op_count(FaultOp::Put), puts);
    }

    #[tokio::test]
    async fn test_reader_unlocatable_offset() {
        let b = backend();
        let mut w = fixed_writer(b.clone(), None);
        w.write_at(&pattern(1000), 0).await.unwrap();
        w.flush().await.unwrap();

        let mut r = reader(b.clone(), None);
        let mut buf = vec![0u8; 16];
        r.read_at(&mut buf, 0).await.unwrap();

        let err = r.read_at(&mut buf, 1 << 30).await.unwrap_err();
        assert_eq!(err.code(), DataCode::MANIFEST_CORRUPT);

        // Error sticks without further backend traffic.
        let gets = b.op_count(FaultOp::Get);
        assert!(r.read_at(&mut buf, 0).await.is_err());
        assert_eq!(b.op_count(FaultOp::Get), gets);
    }

    #[tokio::test]
    async fn test_reader_corrupt_manifest() {
        let b = backend();
        b.put("f/.meta", Metadata::new(), b"not json").await.unwrap();
        let mut r = reader(b, None);
        let mut buf = vec![0u8; 4];
        let err = r.read_at(&mut buf, 0).await.unwrap_err();
        assert_eq!(err.code(), DataCode::MANIFEST_CORRUPT);
    }
}
