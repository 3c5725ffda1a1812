//! Boundary tags: the one-word `{inuse, size}` records bracketing blocks.
//!
//! Bit 0 is the inuse bit; the upper 31 bits hold the block size in words
//! (total size, both tags included). Header and footer of a block carry the
//! same word. A size of zero with the inuse bit set is the fence sentinel.

use crate::heap::HeapSpace;

/// One boundary tag, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryTag {
    /// Total block size in words. At most 31 bits.
    pub size_words: u32,
    /// Whether the block is handed out to a client.
    pub inuse: bool,
}

/// The heap prologue/epilogue sentinel.
pub const FENCE: BoundaryTag = BoundaryTag {
    size_words: 0,
    inuse: true,
};

impl BoundaryTag {
    /// Tag for a free block of `size_words`.
    pub fn free(size_words: usize) -> Self {
        debug_assert!(size_words < (1 << 31));
        Self {
            size_words: size_words as u32,
            inuse: false,
        }
    }

    /// Tag for a used block of `size_words`.
    pub fn used(size_words: usize) -> Self {
        debug_assert!(size_words < (1 << 31));
        Self {
            size_words: size_words as u32,
            inuse: true,
        }
    }

    /// Packs the tag into one word.
    pub fn encode(self) -> u32 {
        (self.size_words << 1) | u32::from(self.inuse)
    }

    /// Unpacks a tag word.
    pub fn decode(word: u32) -> Self {
        Self {
            size_words: word >> 1,
            inuse: word & 1 == 1,
        }
    }

    /// Fence test: inuse with zero size.
    pub fn is_fence(self) -> bool {
        self.inuse && self.size_words == 0
    }

    /// The block size as a word count.
    pub fn words(self) -> usize {
        self.size_words as usize
    }

    /// Reads the tag stored at word offset `w`.
    pub fn read(heap: &HeapSpace, w: usize) -> Self {
        Self::decode(heap.word(w))
    }

    /// Stores the tag at word offset `w` in a single word write.
    pub fn write(self, heap: &mut HeapSpace, w: usize) {
        heap.set_word(w, self.encode());
    }
}
