// src/constants.rs
//
// Centralized constants for recdlio to avoid hardcoded values throughout the codebase

/// Size of the little-endian `u64` length header in front of every record.
pub const RECORD_LENGTH_SIZE: usize = 8;

/// Size of each masked CRC-32C trailer (one after the length, one after the data).
pub const RECORD_CRC_SIZE: usize = 4;

/// Framing bytes surrounding each record payload (length + two checksums).
pub const RECORD_FRAMING_SIZE: usize = RECORD_LENGTH_SIZE + 2 * RECORD_CRC_SIZE;

/// Bytes per entry in a binary index file (`i64` offset + `i64` length).
pub const BINARY_INDEX_ENTRY_SIZE: usize = 16;

/// Rotation/offset applied to CRC-32C values by the TFRecord container format.
pub const CRC_MASK_DELTA: u32 = 0xa282_ead8;

/// Default number of parsed samples buffered ahead of the consumer.
pub const DEFAULT_PREFETCH_DEPTH: usize = 16;

/// Default number of producer threads.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Default batch size used by the CLI.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Extension appended to a container path when the CLI writes its index.
pub const INDEX_FILE_EXTENSION: &str = "idx";

// ============================================================================
// Environment variables read by `ReaderOptions::from_env`
// ============================================================================

pub const ENV_SHUFFLE: &str = "RECDLIO_SHUFFLE";
pub const ENV_SHUFFLE_SEED: &str = "RECDLIO_SHUFFLE_SEED";
pub const ENV_PREFETCH_DEPTH: &str = "RECDLIO_PREFETCH_DEPTH";
pub const ENV_WORKERS: &str = "RECDLIO_WORKERS";
pub const ENV_STRICT_CHECKSUMS: &str = "RECDLIO_STRICT_CHECKSUMS";
