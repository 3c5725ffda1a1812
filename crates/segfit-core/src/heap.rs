//! Heap space: the raw, monotonically growable memory region.
//!
//! Stands in for the sbrk-style extender the allocator runs against:
//! `extend` hands back address-contiguous regions and the region never
//! shrinks. Everything is addressed by offset, word offsets for block
//! structure and byte offsets for client payloads, so growth of the
//! backing storage never moves anything the allocator can observe.

/// Word size in bytes. Block sizes are counted in these.
pub const WSIZE: usize = 4;

/// Double-word size in bytes; the payload alignment unit.
pub const DSIZE: usize = 8;

/// A contiguous, monotonically growable memory region with a hard cap.
///
/// The cap plays the role of OS memory exhaustion: an extension that would
/// cross it fails without growing, like a refused `sbrk`.
#[derive(Debug, Clone)]
pub struct HeapSpace {
    bytes: Vec<u8>,
    limit_bytes: usize,
}

impl HeapSpace {
    /// Creates an empty heap that may grow up to `limit_bytes`.
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit_bytes,
        }
    }

    /// Grows the region by exactly `n_bytes` and returns the byte offset of
    /// the new region's base. Fails (without growing) if the cap would be
    /// exceeded. Successive calls return strictly ascending, contiguous
    /// regions.
    pub fn extend(&mut self, n_bytes: usize) -> Option<usize> {
        debug_assert!(n_bytes > 0, "extend takes a positive byte count");
        let new_len = self.bytes.len().checked_add(n_bytes)?;
        if new_len > self.limit_bytes {
            return None;
        }
        let base = self.bytes.len();
        self.bytes.resize(new_len, 0);
        Some(base)
    }

    /// Lowest byte offset of the region. Always zero; kept for symmetry
    /// with `hi_bytes` in walk bounds.
    pub fn lo_bytes(&self) -> usize {
        0
    }

    /// One past the highest mapped byte offset.
    pub fn hi_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Current region size in words.
    pub fn size_words(&self) -> usize {
        self.bytes.len() / WSIZE
    }

    /// The configured growth cap in bytes.
    pub fn limit_bytes(&self) -> usize {
        self.limit_bytes
    }

    /// Reads the word at word offset `w`.
    pub fn word(&self, w: usize) -> u32 {
        let at = w * WSIZE;
        let raw: [u8; WSIZE] = self.bytes[at..at + WSIZE]
            .try_into()
            .expect("word read within mapped heap");
        u32::from_le_bytes(raw)
    }

    /// Stores `v` at word offset `w` in a single write.
    pub fn set_word(&mut self, w: usize, v: u32) {
        let at = w * WSIZE;
        self.bytes[at..at + WSIZE].copy_from_slice(&v.to_le_bytes());
    }

    /// Borrows `len` bytes starting at byte offset `byte_off`.
    pub fn bytes(&self, byte_off: usize, len: usize) -> &[u8] {
        &self.bytes[byte_off..byte_off + len]
    }

    /// Mutably borrows `len` bytes starting at byte offset `byte_off`.
    pub fn bytes_mut(&mut self, byte_off: usize, len: usize) -> &mut [u8] {
        &mut self.bytes[byte_off..byte_off + len]
    }

    /// Copies `len` bytes from `src_byte` to `dst_byte` within the region.
    pub fn copy_bytes(&mut self, src_byte: usize, dst_byte: usize, len: usize) {
        self.bytes.copy_within(src_byte..src_byte + len, dst_byte);
    }

    /// The whole mapped region, for snapshot comparisons.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
