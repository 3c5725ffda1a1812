//! Runtime configuration.
//!
//! Resolved from the environment with lenient parsing: anything missing or
//! malformed keeps its default. The heap limit is the stand-in for OS
//! memory exhaustion, which is what the out-of-memory tests cap.

use std::env;

/// Default heap cap in bytes.
pub const DEFAULT_HEAP_LIMIT_BYTES: usize = 1 << 30;

/// Default heap extension quantum in words.
pub const DEFAULT_CHUNK_WORDS: usize = 1 << 10;

/// Environment variable overriding the heap cap.
pub const HEAP_LIMIT_ENV: &str = "SEGFIT_HEAP_LIMIT_BYTES";

/// Environment variable overriding the extension quantum.
pub const CHUNK_WORDS_ENV: &str = "SEGFIT_CHUNK_WORDS";

/// Tunables the allocator is constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Hard cap on heap growth; extensions past it fail like a refused
    /// sbrk.
    pub heap_limit_bytes: usize,
    /// Minimum number of words requested from the heap space per
    /// extension.
    pub chunk_words: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            heap_limit_bytes: DEFAULT_HEAP_LIMIT_BYTES,
            chunk_words: DEFAULT_CHUNK_WORDS,
        }
    }
}

impl AllocatorConfig {
    /// Defaults with overrides from the environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = read_env_usize(HEAP_LIMIT_ENV) {
            cfg.heap_limit_bytes = v;
        }
        if let Some(v) = read_env_usize(CHUNK_WORDS_ENV) {
            cfg.chunk_words = v;
        }
        cfg
    }

    /// Defaults with a specific heap cap.
    pub fn with_heap_limit(limit_bytes: usize) -> Self {
        Self {
            heap_limit_bytes: limit_bytes,
            ..Self::default()
        }
    }
}

fn read_env_usize(name: &str) -> Option<usize> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(v) if v > 0 => Some(v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AllocatorConfig::default();
        assert_eq!(cfg.heap_limit_bytes, DEFAULT_HEAP_LIMIT_BYTES);
        assert_eq!(cfg.chunk_words, DEFAULT_CHUNK_WORDS);
    }

    #[test]
    fn test_with_heap_limit_keeps_other_defaults() {
        let cfg = AllocatorConfig::with_heap_limit(4096);
        assert_eq!(cfg.heap_limit_bytes, 4096);
        assert_eq!(cfg.chunk_words, DEFAULT_CHUNK_WORDS);
    }
}
