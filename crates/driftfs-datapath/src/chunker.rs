//! Content-defined chunk boundary detection.
//!
//! Rolling Rabin fingerprint over a 64-byte window. Boundaries fall where
//! the fingerprint masked to the average-size bits hits zero, clamped to
//! `[min_size, max_size]`. The polynomial and average-bits below are part
//! of the on-disk format: files written earlier must keep producing the
//! same boundaries, so they must never change.

use std::sync::OnceLock;

/// Irreducible polynomial over GF(2) driving the rolling hash.
pub const CHUNKER_POLYNOMIAL: u64 = 0x3DA3358B4DC173;

/// Average chunk size of 2^23 bytes.
pub const CHUNKER_AVERAGE_BITS: u32 = 23;

const WINDOW_SIZE: usize = 64;

fn pol_deg(x: u64) -> i32 {
    63 - x.leading_zeros() as i32
}

fn pol_mod(mut x: u64, d: u64) -> u64 {
    let dd = pol_deg(d);
    while pol_deg(x) >= dd {
        x ^= d << (pol_deg(x) - dd);
    }
    x
}

fn append_byte(hash: u64, b: u8, pol: u64) -> u64 {
    pol_mod((hash << 8) | b as u64, pol)
}

struct Tables {
    // out[b] = fingerprint of (b || 63 zero bytes); XOR-ing it removes the
    // byte leaving the window.
    out: [u64; 256],
    // mod_[b] reduces the top byte b of the shifted fingerprint mod the
    // polynomial.
    mod_: [u64; 256],
}

impl Tables {
    fn compute(pol: u64) -> Self {
        let mut out = [0u64; 256];
        for (b, slot) in out.iter_mut().enumerate() {
            let mut h = append_byte(0, b as u8, pol);
            for _ in 0..WINDOW_SIZE - 1 {
                h = append_byte(h, 0, pol);
            }
            *slot = h;
        }

        let k = pol_deg(pol) as u32;
        let mut mod_ = [0u64; 256];
        for (b, slot) in mod_.iter_mut().enumerate() {
            let shifted = (b as u64) << k;
            *slot = pol_mod(shifted, pol) | shifted;
        }

        Self { out, mod_ }
    }
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| Tables::compute(CHUNKER_POLYNOMIAL))
}

/// Splits byte slices at content-defined boundaries.
///
/// State is reset at the start of every chunk, so a given input slice
/// always produces the same cuts regardless of what was chunked before.
pub struct RabinChunker {
    min_size: usize,
    max_size: usize,
    split_mask: u64,
    pol_shift: u32,
    tables: &'static Tables,
    window: [u8; WINDOW_SIZE],
    wpos: usize,
    digest: u64,
}

impl RabinChunker {
    /// Chunker with the production bounds: 4 MiB min, 16 MiB max, 8 MiB
    /// average.
    pub fn new(min_size: usize, max_size: usize) -> Self {
        Self::with_average_bits(min_size, max_size, CHUNKER_AVERAGE_BITS)
    }

    pub fn with_average_bits(min_size: usize, max_size: usize, average_bits: u32) -> Self {
        assert!(min_size >= WINDOW_SIZE, "min_size below window size");
        assert!(min_size <= max_size, "min_size above max_size");
        Self {
            min_size,
            max_size,
            split_mask: (1u64 << average_bits) - 1,
            pol_shift: pol_deg(CHUNKER_POLYNOMIAL) as u32 - 8,
            tables: tables(),
            window: [0; WINDOW_SIZE],
            wpos: 0,
            digest: 0,
        }
    }

    /// Split `data` into content-defined chunks covering all of it.
    ///
    /// Every chunk except possibly the last has a length in
    /// `[min_size, max_size]`; a short final chunk holds the residual.
    pub fn split<'a>(&mut self, data: &'a [u8]) -> Vec<&'a [u8]> {
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < data.len() {
            let rest = &data[start..];
            let cut = self.next_cut(rest);
            chunks.push(&rest[..cut]);
            start += cut;
        }
        chunks
    }

    fn next_cut(&mut self, data: &[u8]) -> usize {
        if data.len() <= self.min_size {
            return data.len();
        }
        self.reset_window();
        // The first min_size - WINDOW_SIZE bytes can never end a chunk, so
        // they are counted but not hashed.
        let mut idx = self.min_size - WINDOW_SIZE;
        while idx < data.len() {
            self.slide(data[idx]);
            idx += 1;
            if idx < self.min_size {
                continue;
            }
            if self.digest & self.split_mask == 0 || idx >= self.max_size {
                return idx;
            }
        }
        data.len()
    }

    fn reset_window(&mut self) {
        self.window = [0; WINDOW_SIZE];
        self.wpos = 0;
        self.digest = 0;
        self.slide(1);
    }

    #[inline]
    fn slide(&mut self, b: u8) {
        let out = self.window[self.wpos];
        self.window[self.wpos] = b;
        self.digest ^= self.tables.out[out as usize];
        self.wpos = (self.wpos + 1) % WINDOW_SIZE;

        let index = (self.digest >> self.pol_shift) as usize;
        self.digest <<= 8;
        self.digest |= b as u64;
        self.digest ^= self.tables.mod_[index];
    }
}
