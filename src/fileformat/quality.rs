// This software is released under the MIT license.
// See file LICENSE for full license details.
use itertools::{Itertools, MinMaxResult};
use log::{debug, info};
use std::path::PathBuf;

use super::fastq::{open_fastq, FastqParser, ParserOptions};
use crate::runtime::Result;

/// Canonical output offset (Phred+33)
pub const SANGER_OFFSET: u8 = 33;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityEncoding {
    /// Phred+33
    Sanger,
    /// Phred+64, Illumina 1.3 to 1.7
    Illumina,
    /// Solexa odds scores +64, may go down to -5
    Solexa,
}

impl QualityEncoding {
    pub fn offset(&self) -> u8 {
        match self {
            QualityEncoding::Sanger => SANGER_OFFSET,
            QualityEncoding::Illumina | QualityEncoding::Solexa => 64,
        }
    }
}

impl std::str::FromStr for QualityEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sanger" | "phred33" | "phred+33" => Ok(QualityEncoding::Sanger),
            "illumina" | "phred64" | "phred+64" => Ok(QualityEncoding::Illumina),
            "solexa" => Ok(QualityEncoding::Solexa),
            _ => Err(format!("Unknown quality encoding: {}", s)),
        }
    }
}

impl std::fmt::Display for QualityEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityEncoding::Sanger => write!(f, "Sanger (Phred+33)"),
            QualityEncoding::Illumina => write!(f, "Illumina (Phred+64)"),
            QualityEncoding::Solexa => write!(f, "Solexa (+64)"),
        }
    }
}

///////////////////////////////
/// Character bounds used to tell the schemes apart. Anything below
/// `solexa_min` can only be Sanger; anything below `illumina_min` rules out
/// Illumina 1.3+. A sample that never goes above `sanger_max` fits Phred+33
/// and is read as Sanger.
#[derive(Debug, Clone, Copy)]
pub struct DetectorPolicy {
    pub solexa_min: u8,
    pub illumina_min: u8,
    pub sanger_max: u8,
}

impl Default for DetectorPolicy {
    fn default() -> Self {
        DetectorPolicy {
            solexa_min: b';',
            illumina_min: b'@',
            sanger_max: b'J',
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityDetector {
    pub policy: DetectorPolicy,
    pub max_sample_chars: usize,
}

impl QualityDetector {
    pub fn new(max_sample_chars: usize) -> QualityDetector {
        QualityDetector {
            policy: DetectorPolicy::default(),
            max_sample_chars,
        }
    }

    /// Classify a sample of raw quality characters; only the first
    /// `max_sample_chars` are looked at. An empty sample is taken as Sanger.
    pub fn detect(&self, sample: &[u8]) -> QualityEncoding {
        let capped = &sample[..sample.len().min(self.max_sample_chars)];
        let (lowest, highest) = match capped.iter().minmax() {
            MinMaxResult::NoElements => return QualityEncoding::Sanger,
            MinMaxResult::OneElement(q) => (*q, *q),
            MinMaxResult::MinMax(lo, hi) => (*lo, *hi),
        };
        debug!("Quality sample range: {}..={}", lowest as char, highest as char);

        if lowest < self.policy.solexa_min || highest <= self.policy.sanger_max {
            QualityEncoding::Sanger
        } else if lowest < self.policy.illumina_min {
            QualityEncoding::Solexa
        } else {
            QualityEncoding::Illumina
        }
    }

    /// Collect up to `max_sample_chars` quality characters from the start of each file
    pub fn sample_files(&self, paths: &[PathBuf], options: &ParserOptions) -> Result<Vec<u8>> {
        let mut sample = Vec::with_capacity(self.max_sample_chars * paths.len());
        for (idx, path) in paths.iter().enumerate() {
            let reader = open_fastq(path)?;
            let mut parser = FastqParser::new(reader, options.clone(), (idx + 1).to_string());
            let mut taken = 0;
            while taken < self.max_sample_chars {
                match parser.next_read()? {
                    Some(read) => {
                        let n = read.qualities.len().min(self.max_sample_chars - taken);
                        sample.extend_from_slice(&read.qualities[..n]);
                        taken += n;
                    }
                    None => break,
                }
            }
            debug!("Sampled {} quality characters from {}", taken, path.display());
        }
        Ok(sample)
    }

    pub fn detect_files(&self, paths: &[PathBuf], options: &ParserOptions) -> Result<QualityEncoding> {
        let sample = self.sample_files(paths, options)?;
        let encoding = self.detect(&sample);
        info!("Detected quality encoding: {}", encoding);
        Ok(encoding)
    }
}

///////////////////////////////
/// Byte-wise conversion of quality characters to Phred+33
#[derive(Clone)]
pub struct Normalizer {
    encoding: QualityEncoding,
    table: [u8; 256],
}

impl Normalizer {
    pub fn new(encoding: QualityEncoding) -> Normalizer {
        let mut table = [0u8; 256];
        for (c, out) in table.iter_mut().enumerate() {
            *out = convert_quality(c as u8, encoding);
        }
        Normalizer { encoding, table }
    }

    pub fn is_identity(&self) -> bool {
        self.encoding == QualityEncoding::Sanger
    }

    pub fn apply(&self, qualities: &mut [u8]) {
        if self.is_identity() {
            return;
        }
        for q in qualities.iter_mut() {
            *q = self.table[*q as usize];
        }
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer").field("encoding", &self.encoding).finish()
    }
}

fn convert_quality(c: u8, encoding: QualityEncoding) -> u8 {
    match encoding {
        QualityEncoding::Sanger => c,
        QualityEncoding::Illumina => c
            .saturating_sub(encoding.offset() - SANGER_OFFSET)
            .max(SANGER_OFFSET),
        QualityEncoding::Solexa => {
            // Q_phred = 10 log10(10^(Q_solexa/10) + 1)
            let solexa = c as f64 - encoding.offset() as f64;
            let phred = (10.0 * (10f64.powf(solexa / 10.0) + 1.0).log10()).round();
            (phred.clamp(0.0, 93.0) as u8) + SANGER_OFFSET
        }
    }
}
