// src/options.rs
//!
//! Construction-time options for the loader and the prefetching reader.
//!
//! Builder helpers are provided so callers can write a fluent style:
//!
//! let opts = ReaderOptions::default()
//!     .shuffle(true, 42)
//!     .prefetch_depth(32)
//!     .worker_count(4)
//!     .strict_checksums(false)
//!     .shard(0, 8);
//!

use std::str::FromStr;

use crate::constants::{
    DEFAULT_PREFETCH_DEPTH, DEFAULT_WORKER_COUNT, ENV_PREFETCH_DEPTH, ENV_SHUFFLE,
    ENV_SHUFFLE_SEED, ENV_STRICT_CHECKSUMS, ENV_WORKERS,
};
use crate::error::{ReaderError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    /// If true, visit records in a per-epoch permutation (deterministic with `shuffle_seed`).
    pub shuffle: bool,
    /// Base seed; epoch `e` is shuffled with `shuffle_seed + e`.
    pub shuffle_seed: u64,
    /// Maximum number of parsed samples buffered ahead of the consumer.
    pub prefetch_depth: usize,
    /// Number of producer threads. `0` means "auto" (use number of CPUs).
    pub worker_count: usize,
    /// Fail on corrupt or unparseable records instead of skipping them.
    pub strict_checksums: bool,
    /// This reader's shard (0-based).
    pub shard_id: usize,
    /// Total number of shards the index is split into.
    pub num_shards: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            shuffle: false,
            shuffle_seed: 0,
            prefetch_depth: DEFAULT_PREFETCH_DEPTH,
            worker_count: DEFAULT_WORKER_COUNT,
            strict_checksums: true,
            shard_id: 0,
            num_shards: 1,
        }
    }
}

impl ReaderOptions {
    /// Defaults overridden by any `RECDLIO_*` environment variables that are set.
    pub fn from_env() -> Result<Self> {
        let mut opts = Self::default();
        if let Some(v) = env_parse::<bool>(ENV_SHUFFLE)? {
            opts.shuffle = v;
        }
        if let Some(v) = env_parse::<u64>(ENV_SHUFFLE_SEED)? {
            opts.shuffle_seed = v;
        }
        if let Some(v) = env_parse::<usize>(ENV_PREFETCH_DEPTH)? {
            opts.prefetch_depth = v;
        }
        if let Some(v) = env_parse::<usize>(ENV_WORKERS)? {
            opts.worker_count = v;
        }
        if let Some(v) = env_parse::<bool>(ENV_STRICT_CHECKSUMS)? {
            opts.strict_checksums = v;
        }
        Ok(opts)
    }

    /// Enable/disable shuffling and set seed.
    ///
    /// When `on` is false, the seed is left unchanged but ignored.
    pub fn shuffle(mut self, on: bool, seed: u64) -> Self {
        self.shuffle = on;
        if on {
            self.shuffle_seed = seed;
        }
        self
    }

    pub fn prefetch_depth(mut self, n: usize) -> Self {
        self.prefetch_depth = n;
        self
    }

    /// Set the number of producer threads; `0` means one per CPU.
    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = n;
        self
    }

    pub fn strict_checksums(mut self, on: bool) -> Self {
        self.strict_checksums = on;
        self
    }

    /// Set sharding (shard_id/num_shards).
    pub fn shard(mut self, shard_id: usize, num_shards: usize) -> Self {
        self.shard_id = shard_id;
        self.num_shards = num_shards;
        self
    }

    /// Worker count with `0` resolved to the CPU count.
    pub fn effective_workers(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_count
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefetch_depth == 0 {
            return Err(ReaderError::InvalidConfig("prefetch_depth must be at least 1".into()));
        }
        if self.num_shards == 0 {
            return Err(ReaderError::InvalidConfig("num_shards must be at least 1".into()));
        }
        if self.shard_id >= self.num_shards {
            return Err(ReaderError::InvalidConfig(format!(
                "shard_id {} out of range for {} shards",
                self.shard_id, self.num_shards
            )));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ReaderError::InvalidConfig(format!("{}: cannot parse '{}'", key, raw))),
        Err(_) => Ok(None),
    }
}
