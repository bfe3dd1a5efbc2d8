//! Growable staging buffer for partially received bytes
//!
//! Each device connection accumulates raw bytes here until a complete unit
//! (preamble, metadata block or framed packet) can be parsed out of it.
//!
//! ```text
//! 0                  len               capacity
//! +------------------+-----------------+
//! | unread bytes     | spare           |
//! +------------------+-----------------+
//! ```
//!
//! Capacity grows by doubling (or to the requested size, whichever is larger)
//! and is only shrunk back to the baseline once the buffer is fully drained.

/// Default baseline capacity (512 KiB)
pub const DEFAULT_BASELINE: usize = 512 * 1024;

/// Append-only byte accumulator with explicit consume/compact
#[derive(Debug)]
pub struct DynamicBuffer {
    storage: Vec<u8>,
    len: usize,
    baseline: usize,
}

impl DynamicBuffer {
    /// Create a buffer with the default baseline capacity
    pub fn new() -> Self {
        Self::with_baseline(DEFAULT_BASELINE)
    }

    /// Create a buffer with a custom baseline capacity
    pub fn with_baseline(baseline: usize) -> Self {
        Self {
            storage: vec![0; baseline],
            len: 0,
            baseline,
        }
    }

    /// Number of unread bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the backing storage
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Baseline capacity the buffer compacts back to
    pub fn baseline(&self) -> usize {
        self.baseline
    }

    /// The unread bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// Read a big-endian u32 at `offset`, if enough bytes are buffered
    pub fn peek_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.as_slice().get(offset..offset + 4)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Append bytes, growing the backing storage if needed
    pub fn append(&mut self, data: &[u8]) {
        let required = self.len + data.len();
        if required > self.storage.len() {
            let new_capacity = (self.storage.len() * 2).max(required);
            self.storage.resize(new_capacity, 0);
        }
        self.storage[self.len..required].copy_from_slice(data);
        self.len = required;
    }

    /// Drop the first `n` unread bytes, shifting the remainder to offset 0
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the number of unread bytes.
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.len,
            "consume({}) out of bounds for buffer of length {}",
            n,
            self.len
        );
        self.storage.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// Drop every unread byte
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Shrink back to the baseline capacity if fully drained
    ///
    /// Returns true if the storage was reallocated.
    pub fn compact_if_idle(&mut self) -> bool {
        if self.len == 0 && self.storage.len() > self.baseline {
            self.storage = vec![0; self.baseline];
            true
        } else {
            false
        }
    }
}

impl Default for DynamicBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_within_capacity() {
        let mut buf = DynamicBuffer::with_baseline(16);
        buf.append(&[1, 2, 3]);
        buf.append(&[4]);

        assert_eq!(buf.len(), 4);
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_append_doubles_capacity() {
        let mut buf = DynamicBuffer::with_baseline(8);
        buf.append(&[0; 6]);
        buf.append(&[1; 4]);

        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.len(), 10);
        assert_eq!(&buf.as_slice()[6..], &[1, 1, 1, 1]);
    }

    #[test]
    fn test_append_grows_to_request_when_larger_than_double() {
        let mut buf = DynamicBuffer::with_baseline(8);
        buf.append(&[7; 100]);

        assert_eq!(buf.capacity(), 100);
        assert_eq!(buf.len(), 100);
    }

    #[test]
    fn test_consume_shifts_remaining_bytes() {
        let mut buf = DynamicBuffer::with_baseline(8);
        buf.append(&[1, 2, 3, 4, 5]);
        buf.consume(2);

        assert_eq!(buf.as_slice(), &[3, 4, 5]);

        buf.consume(3);
        assert!(buf.is_empty());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_consume_out_of_bounds_panics() {
        let mut buf = DynamicBuffer::with_baseline(8);
        buf.append(&[1, 2]);
        buf.consume(3);
    }

    #[test]
    fn test_compact_only_when_drained() {
        let mut buf = DynamicBuffer::with_baseline(4);
        buf.append(&[9; 10]);
        assert!(buf.capacity() > 4);

        // Still holding unread bytes
        assert!(!buf.compact_if_idle());
        assert_eq!(buf.len(), 10);

        buf.consume(10);
        assert!(buf.compact_if_idle());
        assert_eq!(buf.capacity(), 4);

        // Already at baseline
        assert!(!buf.compact_if_idle());
    }

    #[test]
    fn test_peek_u32() {
        let mut buf = DynamicBuffer::with_baseline(8);
        buf.append(&[0x68, 0x32, 0x36]);
        assert_eq!(buf.peek_u32(0), None);

        buf.append(&[0x34, 0x00]);
        assert_eq!(buf.peek_u32(0), Some(0x6832_3634));
        assert_eq!(buf.peek_u32(2), None);
    }
}
