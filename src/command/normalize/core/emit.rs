// This software is released under the MIT license.
// See file LICENSE for full license details.
use std::io::Write;

use super::pairing::EmitStats;
use crate::fileformat::fastq::write_fastq_read;
use crate::fileformat::Read;
use crate::runtime::{NormalizeError, Result};

///////////////////////////////
/// Writes reassembled reads to one or two FASTQ streams.
///
/// With two outputs mates go to their own stream; with one output pairs are
/// interleaved. Orphans always go to the first output. Each pair or orphan
/// takes the next value of the run counter, starting at 1.
pub struct FastqEmitter<W: Write> {
    outputs: Vec<W>,
    prefix: Option<String>,
    paired_input: bool,
    counter: u64,
    stats: EmitStats,
}

impl<W: Write> FastqEmitter<W> {
    /// `paired_input` is true when reads came from two input streams; lone
    /// reads are then orphans, otherwise singles
    pub fn new(outputs: Vec<W>, prefix: Option<String>, paired_input: bool) -> Result<FastqEmitter<W>> {
        if outputs.is_empty() || outputs.len() > 2 {
            return Err(NormalizeError::config(format!(
                "expected one or two output streams, got {}",
                outputs.len()
            )));
        }
        Ok(FastqEmitter {
            outputs,
            prefix,
            paired_input,
            counter: 0,
            stats: EmitStats::default(),
        })
    }

    pub fn emit_pair(&mut self, key: &str, first: &Read, second: &Read) -> Result<()> {
        self.counter += 1;
        let name_first = output_name(self.prefix.as_deref(), self.counter, key, first, Some(1));
        let name_second = output_name(self.prefix.as_deref(), self.counter, key, second, Some(2));

        write_fastq_read(&mut self.outputs[0], &name_first, &first.bases, &first.qualities)?;
        let second_output = self.outputs.len() - 1;
        write_fastq_read(
            &mut self.outputs[second_output],
            &name_second,
            &second.bases,
            &second.qualities,
        )?;

        self.stats.pairs += 1;
        self.stats.reads += 2;
        self.stats.bases += (first.bases.len() + second.bases.len()) as u64;
        Ok(())
    }

    pub fn emit_orphan(&mut self, key: &str, read: &Read) -> Result<()> {
        self.counter += 1;
        let name = output_name(self.prefix.as_deref(), self.counter, key, read, None);
        write_fastq_read(&mut self.outputs[0], &name, &read.bases, &read.qualities)?;

        if self.paired_input {
            self.stats.orphans += 1;
        } else {
            self.stats.singles += 1;
        }
        self.stats.reads += 1;
        self.stats.bases += read.bases.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for output in self.outputs.iter_mut() {
            output.flush()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> EmitStats {
        self.stats
    }

    pub fn into_inner(self) -> Vec<W> {
        self.outputs
    }
}

/// Name written for a read.
///
/// Without prefix the mate suffix is normalized to /1 or /2 (none for lone
/// reads); Casava names of paired reads are written back unchanged since
/// their tail carries the index. With prefix P: "P.<counter> <key>[/1|/2]".
pub fn output_name(prefix: Option<&str>, counter: u64, key: &str, read: &Read, mate: Option<u8>) -> String {
    let suffix = match mate {
        Some(m) if !read.is_casava() => format!("/{}", m),
        _ => String::new(),
    };
    match prefix {
        Some(prefix) => format!("{}.{} {}{}", prefix, counter, key, suffix),
        None => match (&read.tail, mate) {
            (Some(tail), Some(_)) => format!("{} {}", read.name, tail),
            _ => format!("{}{}", key, suffix),
        },
    }
}
