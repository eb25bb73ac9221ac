// This software is released under the MIT license.
// See file LICENSE for full license details.

// Spill thresholds
pub const NORMALIZE_DEFAULT_PAGE_ENTRIES_SINGLE: u64 = 100_000;
pub const NORMALIZE_DEFAULT_PAGE_ENTRIES_PAIRED: u64 = 4_500_000;
pub const NORMALIZE_DEFAULT_PAGE_BYTES: u64 = 4 * 1024 * 1024 * 1024;
pub const NORMALIZE_DEFAULT_ABANDON_BYTES: u64 = 10 * 1024 * 1024 * 1024;

// Quality characters sampled per input file for encoding detection
pub const NORMALIZE_DEFAULT_DETECT_SAMPLE: usize = 100_000;

// Producer hand-off
pub const NORMALIZE_DEFAULT_BATCH_SIZE: usize = 1000;
pub const NORMALIZE_DEFAULT_CHANNEL_CAPACITY: usize = 100;

// Progress logging interval, in reads
pub const NORMALIZE_PROGRESS_INTERVAL: u64 = 100_000;

pub const NORMALIZE_TEMP_PREFIX: &str = "normfq_";
