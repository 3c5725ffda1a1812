//! Process-wide allocator handle.
//!
//! The allocator itself runs single-threaded and lock-free; this module
//! serializes access to one lazily created process-wide instance at the
//! API boundary. Configuration comes from the environment at first touch
//! and the instance lives until process exit.

use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::allocator::{Allocator, InitError};
use crate::config::AllocatorConfig;

static ALLOCATOR: OnceLock<Mutex<Allocator>> = OnceLock::new();

fn global() -> &'static Mutex<Allocator> {
    ALLOCATOR.get_or_init(|| Mutex::new(Allocator::with_config(AllocatorConfig::from_env())))
}

/// Brings the process-wide allocator up. Idempotent.
pub fn init() -> Result<(), InitError> {
    global().lock().init()
}

/// Allocates from the process-wide allocator.
pub fn allocate(size_bytes: usize) -> Option<usize> {
    global().lock().allocate(size_bytes)
}

/// Frees a payload offset on the process-wide allocator. Offset 0 is a
/// no-op.
pub fn free(ptr_bytes: usize) {
    global().lock().free(ptr_bytes);
}

/// Resizes a payload on the process-wide allocator.
pub fn reallocate(ptr_bytes: usize, size_bytes: usize) -> Option<usize> {
    global().lock().reallocate(ptr_bytes, size_bytes)
}

/// Runs `f` with exclusive access to the process-wide allocator.
pub fn with_allocator<R>(f: impl FnOnce(&mut Allocator) -> R) -> R {
    f(&mut global().lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    // These share one process-wide instance across the test binary, so
    // they only assert properties that hold under interleaving.

    #[test]
    fn test_global_alloc_free_cycle() {
        init().expect("global init");
        let p = allocate(96).expect("global allocation");
        assert_ne!(p, 0);
        assert_eq!(p % 8, 0);
        free(p);
        with_allocator(|a| a.check()).expect("global heap consistent");
    }

    #[test]
    fn test_global_reallocate_round_trip() {
        let p = allocate(32).expect("global allocation");
        let q = reallocate(p, 64).expect("global grow");
        free(q);
        with_allocator(|a| a.check()).expect("global heap consistent");
    }
}
