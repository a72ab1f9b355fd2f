//! Out-of-order write reassembly.
//!
//! The kernel may flush dirty pages in any order, but guarantees that the
//! final byte stream is contiguous once every page has been written. Both
//! writers feed strictly-sequential sinks (multipart parts, chunkers), so
//! each handle routes its writes through a [`ReassemblyBuffer`] that turns
//! arbitrary-offset writes into an in-order, gap-free sequence starting at
//! logical offset zero.

use bytes::Bytes;

#[derive(Debug)]
struct Held {
    off: i64,
    data: Bytes,
}

/// Reorders `(off, bytes)` writes into a sequential stream.
///
/// `push` returns the segments that became ready, in stream order; the
/// caller hands them to its sink. Deferred segments wait in a holding
/// list until the stream reaches their offset.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    offset: i64,
    held: Vec<Held>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next expected logical offset.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Number of deferred segments.
    pub fn pending(&self) -> usize {
        self.held.len()
    }

    /// Accept a write at `off`; returns every segment now ready for the
    /// sink, in order.
    pub fn push(&mut self, off: i64, data: &[u8]) -> Vec<Bytes> {
        let mut ready = Vec::new();
        if off == self.offset {
            self.offset += data.len() as i64;
            ready.push(Bytes::copy_from_slice(data));
        } else {
            self.held.push(Held {
                off,
                data: Bytes::copy_from_slice(data),
            });
        }
        self.drain_ready(&mut ready);
        ready
    }

    /// Flush-time pass: release whatever is contiguous from the current
    /// offset. Segments still held afterwards belong to a non-contiguous
    /// file, which the engine neither pads nor rejects.
    pub fn drain(&mut self) -> Vec<Bytes> {
        let mut ready = Vec::new();
        self.drain_ready(&mut ready);
        ready
    }

    /// Restart the stream at offset zero, keeping any deferred segments.
    pub fn restart(&mut self) {
        self.offset = 0;
    }

    /// Drop everything.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.held.clear();
    }

    fn drain_ready(&mut self, ready: &mut Vec<Bytes>) {
        // Restart the scan after every match: a released segment may
        // unblock one stored earlier in the list.
        let mut i = 0;
        while i < self.held.len() {
            if self.held[i].off == self.offset {
                let held = self.held.remove(i);
                self.offset += held.data.len() as i64;
                ready.push(held.data);
                i = 0;
                continue;
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(segments: Vec<Bytes>) -> Vec<u8> {
        let mut out = Vec::new();
        for s in segments {
            out.extend_from_slice(&s);
        }
        out
    }

    #[test]
    fn test_in_order() {
        let mut r = ReassemblyBuffer::new();
        let a = r.push(0, b"abc");
        assert_eq!(collect(a), b"abc");
        let b = r.push(3, b"def");
        assert_eq!(collect(b), b"def");
        assert_eq!(r.offset(), 6);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn test_out_of_order_pair() {
        let mut r = ReassemblyBuffer::new();
        // Second half arrives first.
        assert!(r.push(3, b"def").is_empty());
        assert_eq!(r.pending(), 1);

        let ready = r.push(0, b"abc");
        assert_eq!(collect(ready), b"abcdef");
        assert_eq!(r.offset(), 6);
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn test_multiple_holes_release_in_order() {
        let mut r = ReassemblyBuffer::new();
        assert!(r.push(6, b"gh").is_empty());
        assert!(r.push(2, b"cdef").is_empty());
        let ready = r.push(0, b"ab");
        assert_eq!(collect(ready), b"abcdefgh");
        assert_eq!(r.offset(), 8);
    }

    #[test]
    fn test_chain_unblocks_earlier_entry() {
        let mut r = ReassemblyBuffer::new();
        // Held entry at 4 can only release after the entry at 2, which is
        // stored later in the list; the rescan must pick it up.
        assert!(r.push(4, b"ef").is_empty());
        assert!(r.push(2, b"cd").is_empty());
        let ready = r.push(0, b"ab");
        assert_eq!(collect(ready), b"abcdef");
    }

    #[test]
    fn test_drain_leaves_gap() {
        let mut r = ReassemblyBuffer::new();
        r.push(0, b"ab");
        r.push(10, b"zz");
        let ready = r.drain();
        assert!(ready.is_empty());
        assert_eq!(r.pending(), 1);
        assert_eq!(r.offset(), 2);
    }

    #[test]
    fn test_restart_keeps_held() {
        let mut r = ReassemblyBuffer::new();
        r.push(0, b"ab");
        r.push(10, b"zz");
        r.restart();
        assert_eq!(r.offset(), 0);
        assert_eq!(r.pending(), 1);
    }

    #[test]
    fn test_reset() {
        let mut r = ReassemblyBuffer::new();
        r.push(0, b"ab");
        r.push(10, b"zz");
        r.reset();
        assert_eq!(r.offset(), 0);
        assert_eq!(r.pending(), 0);
    }
}
