//! Core allocator state and operations.
//!
//! `Allocator` owns the heap space and the segregated free-list array and
//! implements the public request surface: `init`, `allocate`, `free`,
//! `reallocate`. Placement, splitting, boundary-tag coalescing and the
//! heap-extension path live here too, together with the consistency
//! checker and structured lifecycle records.
//!
//! Client pointers are payload byte offsets; offset 0 is the null
//! rendering. Block bookkeeping is in words throughout.

use std::fmt;

use serde::Serialize;

use crate::block::{self, MIN_BLOCK_WORDS};
use crate::config::AllocatorConfig;
use crate::free_lists::SegregatedLists;
use crate::heap::{DSIZE, HeapSpace, WSIZE};
use crate::size_class::{NLISTS, class_index};
use crate::tag::{BoundaryTag, FENCE};

/// Severity of a lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: LogLevel,
    /// API symbol (`allocate`, `free`, `reallocate`, `init`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `realloc_in_place`, ...).
    pub event: &'static str,
    /// Payload offset involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event, in bytes.
    pub size: Option<usize>,
    /// Size class touched by the event.
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: blocks currently on the free lists.
    pub free_blocks: usize,
    /// Snapshot: words currently on the free lists.
    pub free_words: usize,
    /// Snapshot: mapped heap size in words.
    pub heap_words: usize,
}

/// Counter snapshot for the allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocatorStats {
    /// Allocation requests that reached placement (zero-size excluded).
    pub allocs: u64,
    /// Frees of live blocks.
    pub frees: u64,
    /// Reallocate requests that reached the resize paths.
    pub reallocs: u64,
    /// Allocations satisfied from the free lists without growing.
    pub find_fit_hits: u64,
    /// Heap extensions performed.
    pub extends: u64,
    /// Splits performed by placement and resize.
    pub splits: u64,
    /// Coalesce operations that merged at least two blocks.
    pub coalesce_merges: u64,
    /// Reallocations resolved without moving the payload.
    pub realloc_in_place: u64,
    /// Reallocations resolved by allocate-copy-free.
    pub realloc_moved: u64,
    /// Requests refused because the heap space was exhausted.
    pub oom_events: u64,
    /// Snapshot: blocks currently on the free lists.
    pub free_blocks: usize,
    /// Snapshot: words currently on the free lists.
    pub free_words: usize,
    /// Snapshot: mapped heap size in words.
    pub heap_words: usize,
}

/// Failure to bring the allocator up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The heap space refused the initial extension.
    HeapExhausted,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeapExhausted => write!(f, "heap space exhausted during init"),
        }
    }
}

impl std::error::Error for InitError {}

/// A violated heap invariant, found by `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyError {
    /// Word 0 is not a fence tag.
    MissingLeftFence,
    /// The block walk ran off the mapped region without meeting a fence.
    MissingRightFence,
    /// A fence tag sits before the last mapped word.
    FenceInsideHeap { word: usize },
    /// A block's size is below the minimum or odd.
    BadBlockSize { block: usize, size_words: usize },
    /// Header and footer of a block disagree.
    TagMismatch { block: usize },
    /// Two free blocks are physically adjacent.
    AdjacentFreeBlocks { left: usize, right: usize },
    /// A free block in the heap is on no free list.
    FreeBlockNotListed { block: usize },
    /// A listed block is not free in the heap.
    ListedBlockNotFree { block: usize },
    /// A listed block sits in the wrong size class.
    ListedBlockMisclassed { block: usize, class: usize },
    /// Free blocks in the heap and list members disagree in number.
    FreeCountMismatch { in_heap: usize, listed: usize },
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLeftFence => write!(f, "word 0 is not a fence"),
            Self::MissingRightFence => write!(f, "walk ran off the heap without a fence"),
            Self::FenceInsideHeap { word } => write!(f, "fence inside the heap at word {word}"),
            Self::BadBlockSize { block, size_words } => {
                write!(f, "block {block} has illegal size {size_words}")
            }
            Self::TagMismatch { block } => {
                write!(f, "block {block} header and footer disagree")
            }
            Self::AdjacentFreeBlocks { left, right } => {
                write!(f, "adjacent free blocks {left} and {right}")
            }
            Self::FreeBlockNotListed { block } => {
                write!(f, "free block {block} is on no free list")
            }
            Self::ListedBlockNotFree { block } => {
                write!(f, "listed block {block} is not free")
            }
            Self::ListedBlockMisclassed { block, class } => {
                write!(f, "block {block} listed in wrong class {class}")
            }
            Self::FreeCountMismatch { in_heap, listed } => {
                write!(f, "{in_heap} free blocks in heap but {listed} listed")
            }
        }
    }
}

impl std::error::Error for ConsistencyError {}

/// The allocator.
pub struct Allocator {
    heap: HeapSpace,
    lists: SegregatedLists,
    config: AllocatorConfig,
    initialized: bool,
    allocs: u64,
    frees: u64,
    reallocs: u64,
    find_fit_hits: u64,
    extends: u64,
    splits: u64,
    coalesce_merges: u64,
    realloc_in_place: u64,
    realloc_moved: u64,
    oom_events: u64,
    next_decision_id: u64,
    lifecycle_logs: Vec<LifecycleRecord>,
}

impl Allocator {
    /// Creates an allocator with default configuration. The heap stays
    /// unmapped until `init` or the first `allocate`.
    pub fn new() -> Self {
        Self::with_config(AllocatorConfig::default())
    }

    /// Creates an allocator with the given configuration.
    pub fn with_config(config: AllocatorConfig) -> Self {
        Self {
            heap: HeapSpace::new(config.heap_limit_bytes),
            lists: SegregatedLists::new(),
            config,
            initialized: false,
            allocs: 0,
            frees: 0,
            reallocs: 0,
            find_fit_hits: 0,
            extends: 0,
            splits: 0,
            coalesce_merges: 0,
            realloc_in_place: 0,
            realloc_moved: 0,
            oom_events: 0,
            next_decision_id: 0,
            lifecycle_logs: Vec::new(),
        }
    }

    /// Whether `init` has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The configuration the allocator was built with.
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// The underlying heap space.
    pub fn heap(&self) -> &HeapSpace {
        &self.heap
    }

    // -----------------------------------------------------------------
    // init
    // -----------------------------------------------------------------

    /// Brings the heap up: both fences, then one chunk-sized free block.
    /// Idempotent once it has succeeded.
    pub fn init(&mut self) -> Result<(), InitError> {
        if self.initialized {
            self.record_lifecycle(
                LogLevel::Trace,
                "init",
                "init",
                None,
                None,
                None,
                "noop",
                "already_initialized",
            );
            return Ok(());
        }

        // A failed earlier attempt may have written the fences already;
        // only map them once.
        if self.heap.hi_bytes() == 0 {
            if self.heap.extend(2 * WSIZE).is_none() {
                self.oom_events += 1;
                self.record_lifecycle(
                    LogLevel::Warn,
                    "init",
                    "init",
                    None,
                    Some(2 * WSIZE),
                    None,
                    "oom",
                    "fence_words_refused",
                );
                return Err(InitError::HeapExhausted);
            }
            FENCE.write(&mut self.heap, 0);
            FENCE.write(&mut self.heap, 1);
        }

        if self.extend_heap(self.config.chunk_words).is_none() {
            self.oom_events += 1;
            self.record_lifecycle(
                LogLevel::Warn,
                "init",
                "init",
                None,
                Some(self.config.chunk_words * WSIZE),
                None,
                "oom",
                "initial_chunk_refused",
            );
            return Err(InitError::HeapExhausted);
        }

        self.initialized = true;
        let chunk = self.config.chunk_words;
        self.record_lifecycle(
            LogLevel::Trace,
            "init",
            "init",
            None,
            Some(chunk * WSIZE),
            None,
            "success",
            format!("chunk_words={chunk}"),
        );
        Ok(())
    }

    fn ensure_init(&mut self) -> bool {
        self.initialized || self.init().is_ok()
    }

    // -----------------------------------------------------------------
    // allocate
    // -----------------------------------------------------------------

    /// Allocates `size_bytes` of storage and returns the payload offset,
    /// or `None` on a zero-size request or heap exhaustion. Payloads are
    /// double-word aligned and not zeroed.
    pub fn allocate(&mut self, size_bytes: usize) -> Option<usize> {
        if size_bytes == 0 {
            self.record_lifecycle(
                LogLevel::Trace,
                "allocate",
                "zero_size",
                None,
                Some(0),
                None,
                "noop",
                "zero_byte_request",
            );
            return None;
        }
        let Some(req) = Self::request_words(size_bytes) else {
            self.oom_events += 1;
            self.record_lifecycle(
                LogLevel::Warn,
                "allocate",
                "alloc",
                None,
                Some(size_bytes),
                None,
                "oom",
                "request_size_overflow",
            );
            return None;
        };
        if !self.ensure_init() {
            return None;
        }

        self.allocs += 1;

        if let Some(b) = self.lists.find_fit(&self.heap, req) {
            self.find_fit_hits += 1;
            let b = self.place(b, req);
            let ptr = block::payload_bytes_of(b);
            self.record_lifecycle(
                LogLevel::Trace,
                "allocate",
                "alloc",
                Some(ptr),
                Some(size_bytes),
                Some(class_index(req)),
                "success",
                format!("path=find_fit req_words={req}"),
            );
            return Some(ptr);
        }

        let grow = req.max(self.config.chunk_words);
        let Some(b) = self.extend_heap(grow) else {
            self.oom_events += 1;
            self.record_lifecycle(
                LogLevel::Warn,
                "allocate",
                "alloc",
                None,
                Some(size_bytes),
                Some(class_index(req)),
                "oom",
                format!("extend_refused grow_words={grow}"),
            );
            return None;
        };
        let b = self.place(b, req);
        let ptr = block::payload_bytes_of(b);
        self.record_lifecycle(
            LogLevel::Trace,
            "allocate",
            "alloc",
            Some(ptr),
            Some(size_bytes),
            Some(class_index(req)),
            "success",
            format!("path=extend_heap req_words={req} grow_words={grow}"),
        );
        Some(ptr)
    }

    /// Words needed to satisfy `size_bytes`: payload plus both tags,
    /// rounded up to a double word, floored at the minimum block size.
    /// `None` when the padded size overflows the address space; no heap
    /// could satisfy such a request.
    fn request_words(size_bytes: usize) -> Option<usize> {
        let padded = size_bytes.checked_add(2 * WSIZE)?;
        let aligned = padded.checked_add(DSIZE - 1)? & !(DSIZE - 1);
        Some((aligned / WSIZE).max(MIN_BLOCK_WORDS))
    }

    // -----------------------------------------------------------------
    // free
    // -----------------------------------------------------------------

    /// Returns the block at payload offset `ptr_bytes` to the free lists,
    /// coalescing with free neighbors. Offset 0 is a no-op.
    pub fn free(&mut self, ptr_bytes: usize) {
        if ptr_bytes == 0 {
            self.record_lifecycle(
                LogLevel::Trace,
                "free",
                "free_null",
                Some(0),
                None,
                None,
                "noop",
                "null_pointer",
            );
            return;
        }

        let Some(b) = self.live_block_of(ptr_bytes) else {
            self.record_lifecycle(
                LogLevel::Warn,
                "free",
                "unknown_free_pointer",
                Some(ptr_bytes),
                None,
                None,
                "ignored",
                "pointer_is_not_a_live_block",
            );
            return;
        };

        let size = block::block_size_words(&self.heap, b);
        self.frees += 1;
        block::mark_free(&mut self.heap, b, size);
        let merged = self.coalesce(b);
        self.record_lifecycle(
            LogLevel::Trace,
            "free",
            "free",
            Some(ptr_bytes),
            Some(size * WSIZE),
            Some(class_index(block::block_size_words(&self.heap, merged))),
            "success",
            format!("merged_block_word={merged}"),
        );
    }

    /// Resolves a payload offset to its block, provided the offset is
    /// aligned, in range, and heads a block that is currently in use.
    fn live_block_of(&self, ptr_bytes: usize) -> Option<usize> {
        if !self.initialized || ptr_bytes % DSIZE != 0 || ptr_bytes < 2 * WSIZE {
            return None;
        }
        let b = block::block_of_payload(ptr_bytes);
        let total = self.heap.size_words();
        if b >= total {
            return None;
        }
        let hdr = block::header(&self.heap, b);
        let size = hdr.words();
        if !hdr.inuse
            || hdr.is_fence()
            || size < MIN_BLOCK_WORDS
            || size % 2 != 0
            || b + size > total
        {
            return None;
        }
        Some(b)
    }

    // -----------------------------------------------------------------
    // reallocate
    // -----------------------------------------------------------------

    /// Resizes the block at `ptr_bytes` to `size_bytes`, in place when the
    /// block itself, its free right neighbor, or the heap edge allows it,
    /// and by allocate-copy-free otherwise. Offset 0 aliases `allocate`;
    /// size 0 aliases `free` and returns `None`.
    pub fn reallocate(&mut self, ptr_bytes: usize, size_bytes: usize) -> Option<usize> {
        if ptr_bytes == 0 {
            let out = self.allocate(size_bytes);
            self.record_lifecycle(
                LogLevel::Trace,
                "reallocate",
                "realloc_null_as_alloc",
                out,
                Some(size_bytes),
                None,
                if out.is_some() { "success" } else { "oom" },
                "ptr_was_null",
            );
            return out;
        }
        if size_bytes == 0 {
            self.free(ptr_bytes);
            self.record_lifecycle(
                LogLevel::Trace,
                "reallocate",
                "realloc_zero_as_free",
                Some(ptr_bytes),
                Some(0),
                None,
                "freed",
                "new_size_was_zero",
            );
            return None;
        }

        let Some(b) = self.live_block_of(ptr_bytes) else {
            self.record_lifecycle(
                LogLevel::Warn,
                "reallocate",
                "realloc_unknown_pointer",
                Some(ptr_bytes),
                Some(size_bytes),
                None,
                "ignored",
                "pointer_is_not_a_live_block",
            );
            return None;
        };

        let old_words = block::block_size_words(&self.heap, b);
        let Some(req) = Self::request_words(size_bytes) else {
            self.oom_events += 1;
            self.record_lifecycle(
                LogLevel::Warn,
                "reallocate",
                "realloc_size_overflow",
                Some(ptr_bytes),
                Some(size_bytes),
                None,
                "oom",
                "request_size_overflow_original_intact",
            );
            return None;
        };
        self.reallocs += 1;

        // Shrink, or already big enough.
        if req <= old_words {
            if old_words - req >= MIN_BLOCK_WORDS {
                block::mark_used(&mut self.heap, b, req);
                let tail = b + req;
                block::mark_free(&mut self.heap, tail, old_words - req);
                self.splits += 1;
                self.coalesce(tail);
                self.record_lifecycle(
                    LogLevel::Trace,
                    "reallocate",
                    "realloc_in_place",
                    Some(ptr_bytes),
                    Some(size_bytes),
                    Some(class_index(req)),
                    "success",
                    format!("path=shrink_split old_words={old_words} req_words={req}"),
                );
            } else {
                self.record_lifecycle(
                    LogLevel::Trace,
                    "reallocate",
                    "realloc_in_place",
                    Some(ptr_bytes),
                    Some(size_bytes),
                    Some(class_index(old_words)),
                    "success",
                    format!("path=shrink_keep old_words={old_words} req_words={req}"),
                );
            }
            self.realloc_in_place += 1;
            return Some(ptr_bytes);
        }

        // Grow with the right fence adjacent: extend and absorb.
        let next_hdr = block::next_header(&self.heap, b);
        if next_hdr.is_fence() {
            let grow = (req - old_words).max(self.config.chunk_words);
            let Some(nb) = self.extend_heap(grow) else {
                self.oom_events += 1;
                self.record_lifecycle(
                    LogLevel::Warn,
                    "reallocate",
                    "realloc_grow_at_fence",
                    Some(ptr_bytes),
                    Some(size_bytes),
                    None,
                    "oom",
                    format!("extend_refused grow_words={grow}"),
                );
                return None;
            };
            // The extension's left neighbor is this used block, so the new
            // free block starts exactly at the old fence word.
            debug_assert_eq!(nb, b + old_words);
            let extent = block::block_size_words(&self.heap, nb);
            self.lists.remove(&mut self.heap, nb);
            block::mark_used(&mut self.heap, b, old_words + extent);
            self.realloc_in_place += 1;
            self.record_lifecycle(
                LogLevel::Trace,
                "reallocate",
                "realloc_in_place",
                Some(ptr_bytes),
                Some(size_bytes),
                Some(class_index(old_words + extent)),
                "success",
                format!("path=grow_at_fence old_words={old_words} extent_words={extent}"),
            );
            return Some(ptr_bytes);
        }

        if !next_hdr.inuse {
            let next = block::next_block(&self.heap, b);
            let combined = old_words + next_hdr.words();

            // Grow into the free right neighbor.
            if combined >= req {
                self.absorb_next(b, next, combined, req);
                self.realloc_in_place += 1;
                self.record_lifecycle(
                    LogLevel::Trace,
                    "reallocate",
                    "realloc_in_place",
                    Some(ptr_bytes),
                    Some(size_bytes),
                    Some(class_index(req)),
                    "success",
                    format!("path=grow_into_next old_words={old_words} combined_words={combined}"),
                );
                return Some(ptr_bytes);
            }

            // Free neighbor, then the fence: extend by the deficit and
            // absorb the merged neighbor.
            if block::next_header(&self.heap, next).is_fence() {
                let deficit = req - combined;
                let Some(merged) = self.extend_heap(deficit) else {
                    self.oom_events += 1;
                    self.record_lifecycle(
                        LogLevel::Warn,
                        "reallocate",
                        "realloc_grow_past_next",
                        Some(ptr_bytes),
                        Some(size_bytes),
                        None,
                        "oom",
                        format!("extend_refused deficit_words={deficit}"),
                    );
                    return None;
                };
                // The extension coalesces with the free neighbor.
                debug_assert_eq!(merged, next);
                let combined = old_words + block::block_size_words(&self.heap, next);
                self.absorb_next(b, next, combined, req);
                self.realloc_in_place += 1;
                self.record_lifecycle(
                    LogLevel::Trace,
                    "reallocate",
                    "realloc_in_place",
                    Some(ptr_bytes),
                    Some(size_bytes),
                    Some(class_index(req)),
                    "success",
                    format!(
                        "path=grow_next_then_fence old_words={old_words} combined_words={combined}"
                    ),
                );
                return Some(ptr_bytes);
            }
        }

        // Move: allocate, copy what the client could have written, free.
        let Some(new_ptr) = self.allocate(size_bytes) else {
            self.record_lifecycle(
                LogLevel::Warn,
                "reallocate",
                "realloc_move",
                Some(ptr_bytes),
                Some(size_bytes),
                None,
                "oom",
                "fallback_allocate_failed_original_intact",
            );
            return None;
        };
        let old_payload_bytes = (old_words - 2) * WSIZE;
        let copy_len = old_payload_bytes.min(size_bytes);
        self.heap.copy_bytes(ptr_bytes, new_ptr, copy_len);
        self.free(ptr_bytes);
        self.realloc_moved += 1;
        self.record_lifecycle(
            LogLevel::Trace,
            "reallocate",
            "realloc_move",
            Some(new_ptr),
            Some(size_bytes),
            Some(class_index(req)),
            "success",
            format!("old_ptr={ptr_bytes} copied_bytes={copy_len}"),
        );
        Some(new_ptr)
    }

    /// Absorbs the free right neighbor into `b` (their sizes sum to
    /// `combined`), splitting the excess back off when it can stand alone.
    fn absorb_next(&mut self, b: usize, next: usize, combined: usize, req: usize) {
        self.lists.remove(&mut self.heap, next);
        if combined - req >= MIN_BLOCK_WORDS {
            block::mark_used(&mut self.heap, b, req);
            let rest = b + req;
            block::mark_free(&mut self.heap, rest, combined - req);
            self.lists.insert(&mut self.heap, rest);
            self.splits += 1;
        } else {
            block::mark_used(&mut self.heap, b, combined);
        }
    }

    // -----------------------------------------------------------------
    // placement, coalescing, extension
    // -----------------------------------------------------------------

    /// Transitions a free block to used, splitting the high end off as a
    /// new free block when the remainder can stand alone.
    fn place(&mut self, b: usize, req_words: usize) -> usize {
        self.lists.remove(&mut self.heap, b);
        let csize = block::block_size_words(&self.heap, b);
        debug_assert!(csize >= req_words);
        if csize - req_words >= MIN_BLOCK_WORDS {
            block::mark_used(&mut self.heap, b, req_words);
            let rest = b + req_words;
            block::mark_free(&mut self.heap, rest, csize - req_words);
            self.lists.insert(&mut self.heap, rest);
            self.splits += 1;
        } else {
            block::mark_used(&mut self.heap, b, csize);
        }
        b
    }

    /// Boundary-tag coalescing. `b` is free-tagged and on no list; the
    /// merged block ends up inserted in its class. Fences read as in use,
    /// which stops merging at the heap edges.
    fn coalesce(&mut self, b: usize) -> usize {
        let prev_used = block::prev_footer(&self.heap, b).inuse;
        let next_used = block::next_header(&self.heap, b).inuse;
        let size = block::block_size_words(&self.heap, b);

        let merged = match (prev_used, next_used) {
            (true, true) => b,
            (true, false) => {
                let next = block::next_block(&self.heap, b);
                let nsize = block::block_size_words(&self.heap, next);
                self.lists.remove(&mut self.heap, next);
                block::mark_free(&mut self.heap, b, size + nsize);
                self.coalesce_merges += 1;
                b
            }
            (false, true) => {
                let prev = block::prev_block(&self.heap, b);
                let psize = block::block_size_words(&self.heap, prev);
                self.lists.remove(&mut self.heap, prev);
                block::mark_free(&mut self.heap, prev, psize + size);
                self.coalesce_merges += 1;
                prev
            }
            (false, false) => {
                let next = block::next_block(&self.heap, b);
                let prev = block::prev_block(&self.heap, b);
                let nsize = block::block_size_words(&self.heap, next);
                let psize = block::block_size_words(&self.heap, prev);
                self.lists.remove(&mut self.heap, next);
                self.lists.remove(&mut self.heap, prev);
                block::mark_free(&mut self.heap, prev, psize + size + nsize);
                self.coalesce_merges += 1;
                prev
            }
        };
        self.lists.insert(&mut self.heap, merged);
        merged
    }

    /// Grows the heap by at least `req_words` (rounded even, floored at
    /// the minimum block), scooping the old right fence into the new free
    /// block and planting a fresh fence past it. Returns the coalesced
    /// block.
    fn extend_heap(&mut self, req_words: usize) -> Option<usize> {
        let words = ((req_words + 1) & !1).max(MIN_BLOCK_WORDS);
        let base_bytes = self.heap.extend(words * WSIZE)?;
        self.extends += 1;
        let b = base_bytes / WSIZE - 1;
        block::mark_free(&mut self.heap, b, words);
        FENCE.write(&mut self.heap, b + words);
        Some(self.coalesce(b))
    }

    // -----------------------------------------------------------------
    // payload access
    // -----------------------------------------------------------------

    /// Borrows `len` payload bytes at offset `ptr_bytes`.
    pub fn payload(&self, ptr_bytes: usize, len: usize) -> &[u8] {
        debug_assert!(len <= self.payload_capacity_bytes(ptr_bytes));
        self.heap.bytes(ptr_bytes, len)
    }

    /// Mutably borrows `len` payload bytes at offset `ptr_bytes`.
    pub fn payload_mut(&mut self, ptr_bytes: usize, len: usize) -> &mut [u8] {
        debug_assert!(len <= self.payload_capacity_bytes(ptr_bytes));
        self.heap.bytes_mut(ptr_bytes, len)
    }

    /// Bytes the client may use at this payload: the block size minus both
    /// tags.
    pub fn payload_capacity_bytes(&self, ptr_bytes: usize) -> usize {
        let b = block::block_of_payload(ptr_bytes);
        (block::block_size_words(&self.heap, b) - 2) * WSIZE
    }

    /// Copy of the whole mapped heap, for byte-identical comparisons.
    pub fn heap_snapshot_bytes(&self) -> Vec<u8> {
        self.heap.as_bytes().to_vec()
    }

    // -----------------------------------------------------------------
    // consistency checker
    // -----------------------------------------------------------------

    /// Verifies the heap invariants: mirrored tags, legal sizes, no
    /// adjacent free pair, a contiguous fence-to-fence walk, and exact
    /// agreement between free blocks in the heap and free-list members.
    pub fn check(&self) -> Result<(), ConsistencyError> {
        if !self.initialized {
            return Ok(());
        }
        let total = self.heap.size_words();
        if !BoundaryTag::read(&self.heap, 0).is_fence() {
            return Err(ConsistencyError::MissingLeftFence);
        }

        let mut free_in_heap = 0usize;
        let mut prev_free_block: Option<usize> = None;
        let mut b = 1usize;
        loop {
            if b >= total {
                return Err(ConsistencyError::MissingRightFence);
            }
            let hdr = BoundaryTag::read(&self.heap, b);
            if hdr.is_fence() {
                if b != total - 1 {
                    return Err(ConsistencyError::FenceInsideHeap { word: b });
                }
                break;
            }
            let size = hdr.words();
            if size < MIN_BLOCK_WORDS || size % 2 != 0 {
                return Err(ConsistencyError::BadBlockSize {
                    block: b,
                    size_words: size,
                });
            }
            if b + size > total {
                return Err(ConsistencyError::MissingRightFence);
            }
            if BoundaryTag::read(&self.heap, b + size - 1) != hdr {
                return Err(ConsistencyError::TagMismatch { block: b });
            }
            if !hdr.inuse {
                if let Some(left) = prev_free_block {
                    return Err(ConsistencyError::AdjacentFreeBlocks { left, right: b });
                }
                if !self.lists.contains(&self.heap, b) {
                    return Err(ConsistencyError::FreeBlockNotListed { block: b });
                }
                free_in_heap += 1;
                prev_free_block = Some(b);
            } else {
                prev_free_block = None;
            }
            b += size;
        }

        let mut listed = 0usize;
        for k in 0..NLISTS {
            for blk in self.lists.blocks_in_class(&self.heap, k) {
                let hdr = block::header(&self.heap, blk);
                if hdr.inuse {
                    return Err(ConsistencyError::ListedBlockNotFree { block: blk });
                }
                if class_index(hdr.words()) != k {
                    return Err(ConsistencyError::ListedBlockMisclassed {
                        block: blk,
                        class: k,
                    });
                }
                listed += 1;
            }
        }
        if listed != free_in_heap {
            return Err(ConsistencyError::FreeCountMismatch {
                in_heap: free_in_heap,
                listed,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // stats and lifecycle records
    // -----------------------------------------------------------------

    /// Counter snapshot.
    pub fn stats(&self) -> AllocatorStats {
        let (free_blocks, free_words) = self.free_snapshot();
        AllocatorStats {
            allocs: self.allocs,
            frees: self.frees,
            reallocs: self.reallocs,
            find_fit_hits: self.find_fit_hits,
            extends: self.extends,
            splits: self.splits,
            coalesce_merges: self.coalesce_merges,
            realloc_in_place: self.realloc_in_place,
            realloc_moved: self.realloc_moved,
            oom_events: self.oom_events,
            free_blocks,
            free_words,
            heap_words: self.heap.size_words(),
        }
    }

    /// Returns a view of the lifecycle records.
    pub fn lifecycle_logs(&self) -> &[LifecycleRecord] {
        &self.lifecycle_logs
    }

    /// Drains the lifecycle records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<LifecycleRecord> {
        std::mem::take(&mut self.lifecycle_logs)
    }

    fn free_snapshot(&self) -> (usize, usize) {
        let mut blocks = 0;
        let mut words = 0;
        for k in 0..NLISTS {
            for b in self.lists.blocks_in_class(&self.heap, k) {
                blocks += 1;
                words += block::block_size_words(&self.heap, b);
            }
        }
        (blocks, words)
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id += 1;
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn record_lifecycle(
        &mut self,
        level: LogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        class: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("segfit::{}::{:016x}", symbol, decision_id);
        let (free_blocks, free_words) = self.free_snapshot();
        self.lifecycle_logs.push(LifecycleRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            ptr,
            size,
            class,
            outcome,
            details: details.into(),
            free_blocks,
            free_words,
            heap_words: self.heap.size_words(),
        });
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CHUNK_WORDS;

    fn fresh() -> Allocator {
        let mut a = Allocator::new();
        a.init().expect("init should succeed");
        a
    }

    /// Free block word offsets with sizes, in heap order.
    fn free_blocks_of(a: &Allocator) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let total = a.heap().size_words();
        let mut b = 1;
        while b < total {
            let hdr = BoundaryTag::read(a.heap(), b);
            if hdr.is_fence() {
                break;
            }
            if !hdr.inuse {
                out.push((b, hdr.words()));
            }
            b += hdr.words();
        }
        out
    }

    #[test]
    fn test_init_then_single_allocate() {
        let mut a = fresh();
        let p = a.allocate(100).expect("allocation should succeed");
        assert_ne!(p, 0);
        assert_eq!(p % DSIZE, 0);
        a.check().expect("heap consistent after allocate");
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut a = fresh();
        let words = a.heap().size_words();
        a.init().expect("second init is a no-op");
        assert_eq!(a.heap().size_words(), words);
    }

    #[test]
    fn test_lazy_init_on_first_allocate() {
        let mut a = Allocator::new();
        assert!(!a.is_initialized());
        let p = a.allocate(64).expect("allocation should succeed");
        assert!(a.is_initialized());
        assert_ne!(p, 0);
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_allocate_zero_returns_none() {
        let mut a = fresh();
        assert_eq!(a.allocate(0), None);
        a.check().expect("heap untouched");
    }

    #[test]
    fn test_payloads_are_aligned_and_in_bounds() {
        let mut a = fresh();
        for size in [1usize, 7, 8, 13, 100, 1000, 4096] {
            let p = a.allocate(size).expect("allocation should succeed");
            assert_eq!(p % DSIZE, 0, "payload for {size} bytes misaligned");
            assert!(a.payload_capacity_bytes(p) >= size);
            assert!(p + size <= a.heap().hi_bytes());
            a.check().expect("heap consistent");
        }
    }

    #[test]
    fn test_coalesce_triplet_merges_to_one_block() {
        let mut alloc = fresh();
        let a = alloc.allocate(32).unwrap();
        let b = alloc.allocate(32).unwrap();
        let c = alloc.allocate(32).unwrap();
        alloc.free(a);
        alloc.free(c);
        alloc.free(b);
        alloc.check().expect("heap consistent after triplet free");

        let free = free_blocks_of(&alloc);
        assert_eq!(free.len(), 1, "all three must merge with the remainder");
        assert_eq!(free[0], (1, DEFAULT_CHUNK_WORDS));
    }

    #[test]
    fn test_split_leaves_classed_remainder() {
        let mut a = fresh();
        let p = a.allocate(64).unwrap();
        let b = block::block_of_payload(p);
        assert_eq!(b, 1, "first block placed at the heap start");
        let used = block::block_size_words(a.heap(), b);
        assert_eq!(used, Allocator::request_words(64).unwrap());

        let free = free_blocks_of(&a);
        assert_eq!(free.len(), 1);
        let (rest, rest_words) = free[0];
        assert_eq!(rest, 1 + used);
        assert_eq!(rest_words, DEFAULT_CHUNK_WORDS - used);
        let k = class_index(rest_words);
        assert!(
            a.lists.blocks_in_class(a.heap(), k).any(|blk| blk == rest),
            "remainder must sit in class {k}"
        );
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_free_null_is_noop() {
        let mut a = fresh();
        let before = a.heap_snapshot_bytes();
        a.free(0);
        assert_eq!(a.heap_snapshot_bytes(), before);
        assert_eq!(a.stats().frees, 0);
    }

    #[test]
    fn test_free_unknown_pointer_ignored() {
        let mut a = fresh();
        let before = a.heap_snapshot_bytes();
        a.free(16); // aligned offset inside the initial free block
        assert_eq!(a.heap_snapshot_bytes(), before);
        assert_eq!(a.stats().frees, 0);
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_double_free_ignored() {
        let mut a = fresh();
        let p = a.allocate(48).unwrap();
        a.free(p);
        let before = a.heap_snapshot_bytes();
        a.free(p);
        assert_eq!(a.heap_snapshot_bytes(), before);
        assert_eq!(a.stats().frees, 1);
        let last = a.lifecycle_logs().last().expect("a record was written");
        assert_eq!(last.event, "unknown_free_pointer");
        assert_eq!(last.outcome, "ignored");
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_realloc_shrink_in_place() {
        let mut a = fresh();
        let p = a.allocate(200).unwrap();
        let q = a.reallocate(p, 100).expect("shrink should succeed");
        assert_eq!(q, p);
        let b = block::block_of_payload(p);
        assert_eq!(
            block::block_size_words(a.heap(), b),
            Allocator::request_words(100).unwrap()
        );
        // The split tail coalesced with the chunk remainder: one free
        // block spans everything after the shrunk block.
        let free = free_blocks_of(&a);
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].0, b + Allocator::request_words(100).unwrap());
        a.check().expect("heap consistent after shrink");
    }

    #[test]
    fn test_realloc_same_size_in_place_preserves_payload() {
        let mut a = fresh();
        let p = a.allocate(64).unwrap();
        let pattern: Vec<u8> = (0..64u8).collect();
        a.payload_mut(p, 64).copy_from_slice(&pattern);

        let q = a.reallocate(p, 64).expect("same-size realloc succeeds");
        assert_eq!(q, p);
        assert_eq!(a.payload(q, 64), pattern.as_slice());
        assert_eq!(a.stats().realloc_in_place, 1);
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_realloc_grow_into_free_neighbor() {
        let mut alloc = fresh();
        let a = alloc.allocate(64).unwrap();
        let b = alloc.allocate(64).unwrap();
        alloc.free(b);
        let extends_before = alloc.stats().extends;

        let q = alloc.reallocate(a, 200).expect("in-place grow succeeds");
        assert_eq!(q, a);
        let blk = block::block_of_payload(a);
        assert_eq!(
            block::block_size_words(alloc.heap(), blk),
            Allocator::request_words(200).unwrap()
        );
        assert_eq!(alloc.stats().extends, extends_before, "no heap growth");
        assert_eq!(alloc.stats().realloc_moved, 0);
        alloc.check().expect("heap consistent");
    }

    #[test]
    fn test_realloc_grow_at_heap_edge() {
        let mut a = fresh();
        // Exactly one chunk: the block's right neighbor is the fence.
        let whole_chunk_bytes = DEFAULT_CHUNK_WORDS * WSIZE - 2 * WSIZE;
        let p = a.allocate(whole_chunk_bytes).unwrap();
        assert!(block::next_header(a.heap(), block::block_of_payload(p)).is_fence());

        let q = a.reallocate(p, 1_000_000).expect("grow at edge succeeds");
        assert_eq!(q, p);
        let blk = block::block_of_payload(p);
        assert!(a.payload_capacity_bytes(p) >= 1_000_000);
        assert!(block::next_header(a.heap(), blk).is_fence());
        assert_eq!(a.stats().realloc_moved, 0);
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_realloc_grow_next_free_then_fence() {
        let mut a = fresh();
        // Fill the chunk so only a minimum free block remains before the
        // fence, then grow past both.
        let big_bytes = (DEFAULT_CHUNK_WORDS - MIN_BLOCK_WORDS) * WSIZE - 2 * WSIZE;
        let p = a.allocate(big_bytes).unwrap();
        let blk = block::block_of_payload(p);
        let next = block::next_block(a.heap(), blk);
        assert!(!block::header(a.heap(), next).inuse);
        assert!(block::next_header(a.heap(), next).is_fence());

        let q = a.reallocate(p, 8200).expect("grow past neighbor succeeds");
        assert_eq!(q, p);
        assert!(a.payload_capacity_bytes(p) >= 8200);
        assert_eq!(a.stats().realloc_moved, 0);
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_realloc_move_preserves_payload() {
        let mut alloc = fresh();
        let a = alloc.allocate(24).unwrap();
        let _guard = alloc.allocate(24).unwrap();
        let pattern: Vec<u8> = (0..24u8).map(|i| i.wrapping_mul(7)).collect();
        alloc.payload_mut(a, 24).copy_from_slice(&pattern);

        // The used right neighbor rules out every in-place path.
        let q = alloc.reallocate(a, 4000).expect("move succeeds");
        assert_ne!(q, a);
        assert_eq!(alloc.payload(q, 24), pattern.as_slice());
        assert_eq!(alloc.stats().realloc_moved, 1);
        alloc.check().expect("heap consistent after move");
    }

    #[test]
    fn test_realloc_null_aliases_allocate() {
        let mut a = fresh();
        let p = a.reallocate(0, 128).expect("alias of allocate");
        assert_ne!(p, 0);
        assert_eq!(p % DSIZE, 0);
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_realloc_zero_frees() {
        let mut a = fresh();
        let p = a.allocate(128).unwrap();
        assert_eq!(a.reallocate(p, 0), None);
        assert_eq!(a.stats().frees, 1);
        let free = free_blocks_of(&a);
        assert_eq!(free.len(), 1, "block merged back with the remainder");
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_oom_leaves_heap_byte_identical() {
        let cfg = AllocatorConfig::with_heap_limit(8 * 1024);
        let mut a = Allocator::with_config(cfg);
        a.init().expect("init fits under the cap");
        let before = a.heap_snapshot_bytes();

        assert_eq!(a.allocate(32 * 1024), None);
        assert_eq!(a.heap_snapshot_bytes(), before);
        assert_eq!(a.stats().oom_events, 1);
        a.check().expect("heap consistent after refused request");
    }

    #[test]
    fn test_allocate_overflowing_size_returns_none() {
        let mut a = fresh();
        let before = a.heap_snapshot_bytes();

        for size in [usize::MAX, usize::MAX - 1, usize::MAX - 2 * WSIZE] {
            assert_eq!(a.allocate(size), None, "padded {size} cannot fit");
        }
        assert_eq!(a.heap_snapshot_bytes(), before);
        assert_eq!(a.stats().oom_events, 3);
        assert_eq!(a.stats().allocs, 0);
        a.check().expect("heap consistent after refused requests");
    }

    #[test]
    fn test_realloc_overflowing_size_leaves_block_intact() {
        let mut a = fresh();
        let p = a.allocate(32).unwrap();
        let pattern: Vec<u8> = (0..32u8).collect();
        a.payload_mut(p, 32).copy_from_slice(&pattern);
        let before = a.heap_snapshot_bytes();

        assert_eq!(a.reallocate(p, usize::MAX - 1), None);
        assert_eq!(a.heap_snapshot_bytes(), before);
        assert_eq!(a.payload(p, 32), pattern.as_slice());
        let last = a.lifecycle_logs().last().expect("a record was written");
        assert_eq!(last.event, "realloc_size_overflow");
        assert_eq!(last.outcome, "oom");
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_init_fails_under_tiny_cap() {
        let cfg = AllocatorConfig::with_heap_limit(64);
        let mut a = Allocator::with_config(cfg);
        assert_eq!(a.init(), Err(InitError::HeapExhausted));
        assert!(!a.is_initialized());
        assert_eq!(a.allocate(16), None);
    }

    #[test]
    fn test_reuse_after_free_round_trip() {
        let mut a = fresh();
        let sizes_before: Vec<(usize, usize)> = free_blocks_of(&a);
        let p = a.allocate(100).unwrap();
        a.free(p);
        assert_eq!(
            free_blocks_of(&a),
            sizes_before,
            "allocate then free restores the free set"
        );
        a.check().expect("heap consistent");
    }

    #[test]
    fn test_stats_and_lifecycle_records() {
        let mut a = fresh();
        let p = a.allocate(64).unwrap();
        a.free(p);
        let stats = a.stats();
        assert_eq!(stats.allocs, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.extends, 1, "only the init chunk extension");
        assert!(stats.find_fit_hits >= 1);
        assert_eq!(stats.heap_words, 2 + DEFAULT_CHUNK_WORDS);

        let logs = a.drain_lifecycle_logs();
        assert!(logs.iter().any(|r| r.symbol == "init"));
        assert!(
            logs.iter()
                .any(|r| r.symbol == "allocate" && r.outcome == "success")
        );
        assert!(
            logs.iter()
                .any(|r| r.symbol == "free" && r.outcome == "success")
        );
        let ids: Vec<u64> = logs.iter().map(|r| r.decision_id).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids are monotonic");
        assert!(a.lifecycle_logs().is_empty(), "drain empties the buffer");
    }
}
