//! Block navigation and tag-arithmetic primitives.
//!
//! A block occupies `[b, b + size)` in words: header tag at `b`, body, and
//! a mirrored footer tag at `b + size - 1`. The fences bracketing the heap
//! make the word before any real header and the word at `b + size` always
//! readable as tags, so neighbor navigation needs no edge branches.
//!
//! Offsets are in words except where a name says bytes.

use crate::heap::{HeapSpace, WSIZE};
use crate::tag::BoundaryTag;

/// Minimum legal block size in words: header, two node words, footer.
pub const MIN_BLOCK_WORDS: usize = 4;

/// The block's header tag.
pub fn header(heap: &HeapSpace, b: usize) -> BoundaryTag {
    BoundaryTag::read(heap, b)
}

/// Total block size in words, read from the header.
pub fn block_size_words(heap: &HeapSpace, b: usize) -> usize {
    header(heap, b).words()
}

/// Footer of the previous block, or the left fence. Always readable.
pub fn prev_footer(heap: &HeapSpace, b: usize) -> BoundaryTag {
    BoundaryTag::read(heap, b - 1)
}

/// Header of the next block, or the right fence. Always readable.
pub fn next_header(heap: &HeapSpace, b: usize) -> BoundaryTag {
    BoundaryTag::read(heap, b + block_size_words(heap, b))
}

/// Start of the previous block. Only meaningful when the previous tag is a
/// real footer, not the left fence.
pub fn prev_block(heap: &HeapSpace, b: usize) -> usize {
    let footer = prev_footer(heap, b);
    debug_assert!(!footer.is_fence(), "no block precedes the left fence");
    b - footer.words()
}

/// Start of the next block. Only meaningful when the next tag is a real
/// header, not the right fence.
pub fn next_block(heap: &HeapSpace, b: usize) -> usize {
    debug_assert!(block_size_words(heap, b) != 0);
    b + block_size_words(heap, b)
}

/// Word offset of the block's footer.
pub fn footer_word(heap: &HeapSpace, b: usize) -> usize {
    b + block_size_words(heap, b) - 1
}

fn write_tags(heap: &mut HeapSpace, b: usize, tag: BoundaryTag) {
    tag.write(heap, b);
    tag.write(heap, b + tag.words() - 1);
}

/// Marks the block free, writing header and footer.
pub fn mark_free(heap: &mut HeapSpace, b: usize, size_words: usize) {
    write_tags(heap, b, BoundaryTag::free(size_words));
}

/// Marks the block used, writing header and footer.
pub fn mark_used(heap: &mut HeapSpace, b: usize, size_words: usize) {
    write_tags(heap, b, BoundaryTag::used(size_words));
}

/// Client rendering of a block: the byte offset of its first body word.
pub fn payload_bytes_of(b: usize) -> usize {
    (b + 1) * WSIZE
}

/// Block owning the payload at byte offset `p_bytes`.
pub fn block_of_payload(p_bytes: usize) -> usize {
    p_bytes / WSIZE - 1
}
