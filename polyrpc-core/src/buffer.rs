//! Composite zero-copy byte accumulator.
//!
//! [`BufferStore`] is the per-connection accumulator the framing engine
//! feeds and the codecs read. It holds incoming chunks as refcounted
//! [`Bytes`] segments; peeks and retained slices within a single segment are
//! refcount bumps, never copies. A request that spans segments assembles a
//! contiguous slice exactly once.
//!
//! Ownership contract: a retained slice keeps its backing chunk alive until
//! dropped, and is dropped exactly once — on the success path by the packet
//! consumer, on the failure path when the packet is discarded.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::DecodeError;

/// Composite byte buffer over refcounted segments.
#[derive(Debug, Default)]
pub struct BufferStore {
    segments: VecDeque<Bytes>,
    readable: usize,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk. Empty chunks are discarded.
    pub fn append_slice(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.readable += chunk.len();
        self.segments.push_back(chunk);
    }

    /// Bytes available between the cursor and the end of the accumulator.
    pub fn readable_bytes(&self) -> usize {
        self.readable
    }

    /// Non-consuming read of the first `n` bytes.
    ///
    /// Zero-copy when the range lies inside the first segment; otherwise
    /// assembles across segments. Fails with `NotEnoughData` if fewer than
    /// `n` bytes are readable.
    pub fn peek(&self, n: usize) -> Result<Bytes, DecodeError> {
        self.retained_slice(0, n)
    }

    /// Non-consuming fixed-size read at `offset`, for header fields.
    pub fn peek_array<const N: usize>(&self, offset: usize) -> Result<[u8; N], DecodeError> {
        if offset + N > self.readable {
            return Err(DecodeError::NotEnoughData);
        }
        let mut out = [0u8; N];
        self.copy_range(offset, &mut out);
        Ok(out)
    }

    /// Non-consuming slice of `n` bytes starting at `offset`, retained
    /// against the backing storage.
    pub fn retained_slice(&self, offset: usize, n: usize) -> Result<Bytes, DecodeError> {
        if offset + n > self.readable {
            return Err(DecodeError::NotEnoughData);
        }
        if n == 0 {
            return Ok(Bytes::new());
        }

        // Find the segment containing `offset`.
        let mut seg_start = 0;
        for seg in &self.segments {
            let seg_end = seg_start + seg.len();
            if offset < seg_end {
                let local = offset - seg_start;
                if local + n <= seg.len() {
                    // Whole range in one segment: refcount bump only.
                    return Ok(seg.slice(local..local + n));
                }
                break;
            }
            seg_start = seg_end;
        }

        // Range spans segments: assemble once.
        let mut out = BytesMut::with_capacity(n);
        out.resize(n, 0);
        self.copy_range(offset, &mut out);
        Ok(out.freeze())
    }

    /// Consuming read of `n` bytes; the returned slice retains the backing
    /// chunk.
    pub fn read_retained_slice(&mut self, n: usize) -> Result<Bytes, DecodeError> {
        let out = self.peek(n)?;
        self.advance(n);
        Ok(out)
    }

    /// Drop `n` bytes from the front.
    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        if n > self.readable {
            return Err(DecodeError::NotEnoughData);
        }
        self.advance(n);
        Ok(())
    }

    fn advance(&mut self, mut n: usize) {
        debug_assert!(n <= self.readable);
        self.readable -= n;
        while n > 0 {
            let Some(front) = self.segments.front_mut() else {
                debug_assert!(false, "readable accounting out of sync");
                return;
            };
            if front.len() > n {
                front.advance(n);
                return;
            }
            n -= front.len();
            self.segments.pop_front();
        }
    }

    fn copy_range(&self, offset: usize, out: &mut [u8]) {
        let mut remaining_skip = offset;
        let mut written = 0;
        for seg in &self.segments {
            if written == out.len() {
                break;
            }
            if remaining_skip >= seg.len() {
                remaining_skip -= seg.len();
                continue;
            }
            let avail = &seg[remaining_skip..];
            remaining_skip = 0;
            let take = avail.len().min(out.len() - written);
            out[written..written + take].copy_from_slice(&avail[..take]);
            written += take;
        }
        debug_assert_eq!(written, out.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_readable() {
        let mut buf = BufferStore::new();
        assert_eq!(buf.readable_bytes(), 0);
        buf.append_slice(Bytes::from_static(b"hello"));
        buf.append_slice(Bytes::new());
        buf.append_slice(Bytes::from_static(b" world"));
        assert_eq!(buf.readable_bytes(), 11);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut buf = BufferStore::new();
        buf.append_slice(Bytes::from_static(b"abcdef"));
        assert_eq!(&buf.peek(3).unwrap()[..], b"abc");
        assert_eq!(&buf.peek(3).unwrap()[..], b"abc");
        assert_eq!(buf.readable_bytes(), 6);
    }

    #[test]
    fn peek_beyond_readable_is_not_enough_data() {
        let mut buf = BufferStore::new();
        buf.append_slice(Bytes::from_static(b"ab"));
        assert_eq!(buf.peek(3), Err(DecodeError::NotEnoughData));
    }

    #[test]
    fn peek_across_segments() {
        let mut buf = BufferStore::new();
        buf.append_slice(Bytes::from_static(b"ab"));
        buf.append_slice(Bytes::from_static(b"cd"));
        buf.append_slice(Bytes::from_static(b"ef"));
        assert_eq!(&buf.peek(5).unwrap()[..], b"abcde");
    }

    #[test]
    fn read_retained_slice_consumes() {
        let mut buf = BufferStore::new();
        buf.append_slice(Bytes::from_static(b"abcdef"));
        let head = buf.read_retained_slice(2).unwrap();
        assert_eq!(&head[..], b"ab");
        assert_eq!(buf.readable_bytes(), 4);
        assert_eq!(&buf.read_retained_slice(4).unwrap()[..], b"cdef");
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn skip_across_segments() {
        let mut buf = BufferStore::new();
        buf.append_slice(Bytes::from_static(b"abc"));
        buf.append_slice(Bytes::from_static(b"def"));
        buf.skip(4).unwrap();
        assert_eq!(&buf.peek(2).unwrap()[..], b"ef");
        assert_eq!(buf.skip(3), Err(DecodeError::NotEnoughData));
    }

    #[test]
    fn retained_slice_at_offset() {
        let mut buf = BufferStore::new();
        buf.append_slice(Bytes::from_static(b"abc"));
        buf.append_slice(Bytes::from_static(b"def"));
        assert_eq!(&buf.retained_slice(2, 3).unwrap()[..], b"cde");
        // Slice fully inside the second segment is zero-copy; content checks
        // are what we can observe.
        assert_eq!(&buf.retained_slice(3, 3).unwrap()[..], b"def");
        assert_eq!(buf.readable_bytes(), 6);
    }

    #[test]
    fn retained_slice_outlives_consumption() {
        let mut buf = BufferStore::new();
        buf.append_slice(Bytes::from_static(b"abcdef"));
        let slice = buf.retained_slice(1, 3).unwrap();
        buf.skip(6).unwrap();
        assert_eq!(&slice[..], b"bcd");
    }

    #[test]
    fn peek_array_reads_header_fields() {
        let mut buf = BufferStore::new();
        buf.append_slice(Bytes::from_static(&[0x12, 0x34]));
        buf.append_slice(Bytes::from_static(&[0x56, 0x78]));
        let word: [u8; 4] = buf.peek_array(0).unwrap();
        assert_eq!(u32::from_be_bytes(word), 0x1234_5678);
        let short: Result<[u8; 4], _> = buf.peek_array(1);
        assert_eq!(short, Err(DecodeError::NotEnoughData));
    }
}
