//! Compression codec dispatch.
//!
//! One codec is selected per filesystem at mount time; an empty selection
//! string disables compression entirely. All codecs work on caller-owned
//! buffers sized via `compress_bound`, so the chunk writers and readers
//! control every allocation.

use std::sync::Arc;

use driftfs_types::{make_error_msg, status_code::DataCode, Result};

/// Buffer-oriented compression capability.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Worst-case compressed size for `src_len` input bytes.
    fn compress_bound(&self, src_len: usize) -> usize;

    /// Compress `src` into `dst`, returning the compressed length.
    fn compress(&self, dst: &mut [u8], src: &[u8]) -> Result<usize>;

    /// Decompress `src` into `dst`, returning the decompressed length.
    fn decompress(&self, dst: &mut [u8], src: &[u8]) -> Result<usize>;
}

/// Resolve a codec by configuration name.
///
/// Empty selection disables compression. Unrecognized names fall back to
/// zstd, matching the mount-time default.
pub fn codec_for(name: &str) -> Option<Arc<dyn Codec>> {
    match name {
        "" => None,
        "lz4" => Some(Arc::new(Lz4Codec)),
        "snappy" => Some(Arc::new(SnappyCodec)),
        "zstd" => Some(Arc::new(ZstdCodec)),
        _ => Some(Arc::new(ZstdCodec)),
    }
}

/// LZ4 block format via `lz4_flex`.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress_bound(&self, src_len: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(src_len)
    }

    fn compress(&self, dst: &mut [u8], src: &[u8]) -> Result<usize> {
        lz4_flex::block::compress_into(src, dst)
            .map_err(|e| driftfs_types::Status::with_message(DataCode::CODEC_ERROR, e.to_string()))
    }

    fn decompress(&self, dst: &mut [u8], src: &[u8]) -> Result<usize> {
        lz4_flex::block::decompress_into(src, dst)
            .map_err(|e| driftfs_types::Status::with_message(DataCode::CODEC_ERROR, e.to_string()))
    }
}

/// Snappy raw format via `snap`.
pub struct SnappyCodec;

impl Codec for SnappyCodec {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn compress_bound(&self, src_len: usize) -> usize {
        snap::raw::max_compress_len(src_len)
    }

    fn compress(&self, dst: &mut [u8], src: &[u8]) -> Result<usize> {
        snap::raw::Encoder::new()
            .compress(src, dst)
            .map_err(|e| driftfs_types::Status::with_message(DataCode::CODEC_ERROR, e.to_string()))
    }

    fn decompress(&self, dst: &mut [u8], src: &[u8]) -> Result<usize> {
        snap::raw::Decoder::new()
            .decompress(src, dst)
            .map_err(|e| driftfs_types::Status::with_message(DataCode::CODEC_ERROR, e.to_string()))
    }
}

/// Zstandard via the `zstd` bulk API.
pub struct ZstdCodec;

const ZSTD_LEVEL: i32 = 3;

impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress_bound(&self, src_len: usize) -> usize {
        zstd::zstd_safe::compress_bound(src_len)
    }

    fn compress(&self, dst: &mut [u8], src: &[u8]) -> Result<usize> {
        zstd::bulk::compress_to_buffer(src, dst, ZSTD_LEVEL)
            .map_err(|e| driftfs_types::Status::with_message(DataCode::CODEC_ERROR, e.to_string()))
    }

    fn decompress(&self, dst: &mut [u8], src: &[u8]) -> Result<usize> {
        zstd::bulk::decompress_to_buffer(src, dst)
            .map_err(|e| driftfs_types::Status::with_message(DataCode::CODEC_ERROR, e.to_string()))
    }
}

/// Convenience used by tests and the writers: compress `src` into a fresh
/// buffer sized by `compress_bound`.
pub fn compress_to_vec(codec: &dyn Codec, src: &[u8]) -> Result<Vec<u8>> {
    let mut dst = vec![0u8; codec.compress_bound(src.len())];
    let n = codec.compress(&mut dst, src)?;
    if n > dst.len() {
        return make_error_msg(
            DataCode::CODEC_ERROR,
            format!("{}: compressed {} past bound {}", codec.name(), n, dst.len()),
        );
    }
    dst.truncate(n);
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: &dyn Codec) {
        let data: Vec<u8> = b"the quick brown fox jumps over the lazy dog"
            .iter()
            .cycle()
            .take(64 << 10)
            .copied()
            .collect();

        let compressed = compress_to_vec(codec, &data).unwrap();
        assert!(compressed.len() < data.len());

        let mut out = vec![0u8; data.len()];
        let n = codec.decompress(&mut out, &compressed).unwrap();
        assert_eq!(n, data.len());
        assert_eq!(out, data);
    }

    #[test]
    fn test_lz4_roundtrip() {
        roundtrip(&Lz4Codec);
    }

    #[test]
    fn test_snappy_roundtrip() {
        roundtrip(&SnappyCodec);
    }

    #[test]
    fn test_zstd_roundtrip() {
        roundtrip(&ZstdCodec);
    }

    #[test]
    fn test_empty_input() {
        for codec in [&Lz4Codec as &dyn Codec, &SnappyCodec, &ZstdCodec] {
            let compressed = compress_to_vec(codec, b"").unwrap();
            let mut out = [0u8; 8];
            let n = codec.decompress(&mut out, &compressed).unwrap();
            assert_eq!(n, 0, "{}", codec.name());
        }
    }

    #[test]
    fn test_codec_for() {
        assert!(codec_for("").is_none());
        assert_eq!(codec_for("lz4").unwrap().name(), "lz4");
        assert_eq!(codec_for("snappy").unwrap().name(), "snappy");
        assert_eq!(codec_for("zstd").unwrap().name(), "zstd");
        // Unknown names fall back to zstd.
        assert_eq!(codec_for("gzip").unwrap().name(), "zstd");
    }
}
