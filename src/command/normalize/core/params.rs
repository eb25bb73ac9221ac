// This software is released under the MIT license.
// See file LICENSE for full license details.
use std::path::PathBuf;

use super::pairing::SpillThresholds;
use crate::command::constants::{
    NORMALIZE_DEFAULT_BATCH_SIZE, NORMALIZE_DEFAULT_CHANNEL_CAPACITY,
    NORMALIZE_DEFAULT_DETECT_SAMPLE,
};
use crate::fileformat::{ParserOptions, QualityEncoding};

pub struct IO {
    /// One file for single-end or interleaved input, two for mate files
    pub path_inputs: Vec<PathBuf>,
    /// One file (interleaved/single) or two mate files; orphans go to the first
    pub path_outputs: Vec<PathBuf>,
    /// Parent of the private spill directory; system temp dir if None
    pub path_tmp: Option<PathBuf>,
}

pub struct Runtime {
    pub prefix: Option<String>,
    pub convert_uracil: bool,
    pub allow_empty: bool,
    pub validate_quality_name: bool,
    /// Skip detection and use this encoding
    pub encoding: Option<QualityEncoding>,
    pub detect_sample_chars: usize,
    pub spill: SpillThresholds,
}

impl Runtime {
    /// Defaults for the given number of input streams
    pub fn new(num_inputs: usize) -> Runtime {
        Runtime {
            prefix: None,
            convert_uracil: false,
            allow_empty: false,
            validate_quality_name: true,
            encoding: None,
            detect_sample_chars: NORMALIZE_DEFAULT_DETECT_SAMPLE,
            spill: SpillThresholds::for_inputs(num_inputs),
        }
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            allow_empty: self.allow_empty,
            allow_uracil: self.convert_uracil,
            validate_quality_name: self.validate_quality_name,
        }
    }
}

pub struct Threading {
    /// Reads per hand-off from a producer to the consumer
    pub batch_size: usize,
    /// Batches a producer may have in flight before it blocks
    pub channel_capacity: usize,
}

impl Default for Threading {
    fn default() -> Self {
        Threading {
            batch_size: NORMALIZE_DEFAULT_BATCH_SIZE,
            channel_capacity: NORMALIZE_DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
