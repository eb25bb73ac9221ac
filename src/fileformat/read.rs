// This software is released under the MIT license.
// See file LICENSE for full license details.
use serde::{Deserialize, Serialize};

use super::readname;

/// Rough per-read bookkeeping cost on top of the payload bytes
pub const READ_OVERHEAD_BYTES: u64 = 96;

///////////////////////////////
/// One parsed FASTQ read.
///
/// `name` is the first token of the header line. For Casava 1.8 names the
/// space-delimited tail (`1:N:0:ACGT`) is kept in `tail` so it can be written
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Read {
    pub name: String,
    pub tail: Option<String>,
    pub bases: Vec<u8>,
    pub qualities: Vec<u8>,
    pub pair_index_token: String,
}

/// Mates of one fragment, addressed by index ordinal
pub type MateSlot = [Option<Read>; 2];

impl Read {
    /// Name with the mate index removed; reads of one fragment share it
    pub fn pair_key(&self) -> &str {
        if self.is_casava() {
            &self.name
        } else {
            readname::strip_index_suffix(&self.name).0
        }
    }

    pub fn is_casava(&self) -> bool {
        self.tail.is_some()
    }

    /// Replace U/u by T/t, leaving every other base untouched
    pub fn convert_uracil(&mut self) {
        for b in self.bases.iter_mut() {
            match *b {
                b'U' => *b = b'T',
                b'u' => *b = b't',
                _ => {}
            }
        }
    }

    pub fn estimated_bytes(&self) -> u64 {
        let tail = self.tail.as_ref().map(|t| t.len()).unwrap_or(0);
        (self.name.len() + tail + self.bases.len() + self.qualities.len() + self.pair_index_token.len())
            as u64
            + READ_OVERHEAD_BYTES
    }
}

#[cfg(test)]
pub(crate) fn plain_read(name: &str, bases: &str, token: &str) -> Read {
    Read {
        name: name.to_string(),
        tail: None,
        bases: bases.as_bytes().to_vec(),
        qualities: vec![b'I'; bases.len()],
        pair_index_token: token.to_string(),
    }
}
