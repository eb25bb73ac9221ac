// This software is released under the MIT license.
// See file LICENSE for full license details.
use log::{info, warn};
use std::fs;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use super::emit::FastqEmitter;
use super::pairing::PairingEngine;
use super::params;
use super::scheduler::{ReadSource, ReadTransform, Scheduler};
use crate::fileformat::fastq::open_fastq;
use crate::fileformat::{FastqSink, Normalizer, QualityDetector, QualityEncoding};
use crate::runtime::{NormalizeError, Result};

/// Counts reported at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub total_reads: u64,
    pub pairs: u64,
    pub orphans: u64,
    pub singles: u64,
    pub bases: u64,
    pub generations: usize,
    pub encoding: QualityEncoding,
}

pub struct Normalize {}

impl Normalize {
    /// File-level run: detect the encoding, normalize and pair, write outputs.
    /// Outputs of a failed run are removed.
    pub fn normalize(
        params_io: Arc<params::IO>,
        params_runtime: Arc<params::Runtime>,
        params_threading: Arc<params::Threading>,
    ) -> Result<RunStats> {
        info!("Running command: normalize");
        check_stream_counts(params_io.path_inputs.len(), params_io.path_outputs.len())?;

        let encoding = match params_runtime.encoding {
            Some(encoding) => {
                info!("Using quality encoding {}", encoding);
                encoding
            }
            None => QualityDetector::new(params_runtime.detect_sample_chars)
                .detect_files(&params_io.path_inputs, &params_runtime.parser_options())?,
        };

        let mut inputs: Vec<Box<dyn BufRead + Send>> = Vec::with_capacity(params_io.path_inputs.len());
        for path in params_io.path_inputs.iter() {
            inputs.push(open_fastq(path)?);
        }

        let mut outputs = Vec::with_capacity(params_io.path_outputs.len());
        for path in params_io.path_outputs.iter() {
            info!("Creating output file: {}", path.display());
            match FastqSink::create(path) {
                Ok(sink) => outputs.push(sink),
                Err(e) => {
                    let created = outputs.len();
                    drop(outputs);
                    remove_outputs(&params_io.path_outputs[..created]);
                    return Err(e);
                }
            }
        }

        let result = Normalize::normalize_streams(
            inputs,
            outputs,
            encoding,
            params_io.path_tmp.as_deref(),
            &params_runtime,
            &params_threading,
        )
        .and_then(|(stats, sinks)| {
            for sink in sinks {
                sink.finish()?;
            }
            Ok(stats)
        });

        match result {
            Ok(stats) => {
                log_summary(&stats);
                Ok(stats)
            }
            Err(e) => {
                remove_outputs(&params_io.path_outputs);
                Err(e)
            }
        }
    }

    /// Stream-level run with a known encoding. Returns the outputs so the
    /// caller can finish them.
    pub fn normalize_streams<W: Write>(
        inputs: Vec<Box<dyn BufRead + Send>>,
        outputs: Vec<W>,
        encoding: QualityEncoding,
        path_tmp: Option<&std::path::Path>,
        params_runtime: &params::Runtime,
        params_threading: &params::Threading,
    ) -> Result<(RunStats, Vec<W>)> {
        check_stream_counts(inputs.len(), outputs.len())?;
        let paired_input = inputs.len() == 2;

        let mut engine = PairingEngine::new(params_runtime.spill, path_tmp)?;
        let mut emitter = FastqEmitter::new(outputs, params_runtime.prefix.clone(), paired_input)?;

        let scheduler = Scheduler {
            parser_options: params_runtime.parser_options(),
            transform: ReadTransform {
                normalizer: Normalizer::new(encoding),
                convert_uracil: params_runtime.convert_uracil,
            },
            batch_size: params_threading.batch_size,
            channel_capacity: params_threading.channel_capacity,
        };
        let sources = inputs
            .into_iter()
            .enumerate()
            .map(|(stream, reader)| ReadSource { stream, reader })
            .collect();
        scheduler.run(sources, &mut engine)?;

        let total_reads = engine.reads_appended();
        let generations = engine.generations().len();
        let emitted = engine.finalize(&mut emitter)?;

        Ok((
            RunStats {
                total_reads,
                pairs: emitted.pairs,
                orphans: emitted.orphans,
                singles: emitted.singles,
                bases: emitted.bases,
                generations,
                encoding,
            },
            emitter.into_inner(),
        ))
    }
}

fn check_stream_counts(inputs: usize, outputs: usize) -> Result<()> {
    if !(1..=2).contains(&inputs) {
        return Err(NormalizeError::config(format!("expected one or two inputs, got {}", inputs)));
    }
    if !(1..=2).contains(&outputs) {
        return Err(NormalizeError::config(format!("expected one or two outputs, got {}", outputs)));
    }
    Ok(())
}

/// Outputs of a failed run are not usable; delete them
fn remove_outputs(paths: &[PathBuf]) {
    for path in paths {
        if let Err(rm) = fs::remove_file(path) {
            warn!("Could not remove incomplete output {}: {}", path.display(), rm);
        }
    }
}

fn log_summary(stats: &RunStats) {
    info!(
        "Processed {} reads ({} bases, {}): {} pairs, {} orphans, {} singles, {} spilled generation(s)",
        stats.total_reads,
        stats.bases,
        stats.encoding,
        stats.pairs,
        stats.orphans,
        stats.singles,
        stats.generations
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::normalize::core::pairing::SpillThresholds;
    use crate::fileformat::fastq::buffered;
    use std::io::Cursor;

    fn input(text: &str) -> Box<dyn BufRead + Send> {
        buffered(Cursor::new(text.as_bytes().to_vec()))
    }

    fn fastq(records: &[(&str, &str)]) -> String {
        records
            .iter()
            .map(|(name, bases)| format!("@{}\n{}\n+\n{}\n", name, bases, "5".repeat(bases.len())))
            .collect()
    }

    fn run(
        inputs: Vec<&str>,
        outputs: usize,
        runtime: &params::Runtime,
    ) -> Result<(RunStats, Vec<String>)> {
        let inputs = inputs.into_iter().map(input).collect();
        let outputs = vec![Vec::<u8>::new(); outputs];
        let (stats, outputs) = Normalize::normalize_streams(
            inputs,
            outputs,
            QualityEncoding::Sanger,
            None,
            runtime,
            &params::Threading::default(),
        )?;
        let outputs = outputs
            .into_iter()
            .map(|o| String::from_utf8(o).unwrap())
            .collect();
        Ok((stats, outputs))
    }

    fn names(fastq: &str) -> Vec<&str> {
        fastq.lines().step_by(4).collect()
    }

    #[test]
    fn matched_pairs() {
        let r1 = fastq(&[("A/1", "ACGT"), ("B/1", "GG")]);
        let r2 = fastq(&[("A/2", "TTTT"), ("B/2", "CC")]);
        let (stats, out) = run(vec![&r1, &r2], 2, &params::Runtime::new(2)).unwrap();
        assert_eq!((stats.pairs, stats.orphans, stats.total_reads), (2, 0, 4));
        assert_eq!(stats.bases, 12);
        assert_eq!(names(&out[0]), vec!["@A/1", "@B/1"]);
        assert_eq!(names(&out[1]), vec!["@A/2", "@B/2"]);
    }

    #[test]
    fn orphans_go_to_first_output_unsuffixed() {
        let r1 = fastq(&[("A/1", "A"), ("B/1", "C"), ("C/1", "G")]);
        let r2 = fastq(&[("A/2", "T")]);
        let (stats, out) = run(vec![&r1, &r2], 2, &params::Runtime::new(2)).unwrap();
        assert_eq!((stats.pairs, stats.orphans, stats.total_reads), (1, 2, 4));
        assert_eq!(names(&out[0]), vec!["@A/1", "@B", "@C"]);
        assert_eq!(names(&out[1]), vec!["@A/2"]);
    }

    #[test]
    fn prefix_names() {
        let mut runtime = params::Runtime::new(2);
        runtime.prefix = Some("RUN".to_string());
        let r1 = fastq(&[("A/1", "A")]);
        let r2 = fastq(&[("A/2", "T")]);
        let (_, out) = run(vec![&r1, &r2], 2, &runtime).unwrap();
        assert_eq!(names(&out[0]), vec!["@RUN.1 A/1"]);
        assert_eq!(names(&out[1]), vec!["@RUN.1 A/2"]);
    }

    #[test]
    fn uracil_conversion() {
        let mut runtime = params::Runtime::new(1);
        runtime.convert_uracil = true;
        let r1 = fastq(&[("A", "AUGCU")]);
        let (stats, out) = run(vec![&r1], 1, &runtime).unwrap();
        assert_eq!(stats.singles, 1);
        assert_eq!(out[0].lines().nth(1), Some("ATGCT"));
    }

    #[test]
    fn third_index_token() {
        let r1 = fastq(&[("A/1", "A"), ("B/3", "A")]);
        let r2 = fastq(&[("A/2", "A")]);
        let err = run(vec![&r1, &r2], 2, &params::Runtime::new(2)).unwrap_err();
        assert!(matches!(err, NormalizeError::UnexpectedIndexToken { .. }));
    }

    #[test]
    fn unsuffixed_mate_files_pair_by_stream() {
        let r1 = fastq(&[("frag1", "A"), ("frag2", "C")]);
        let r2 = fastq(&[("frag2", "G"), ("frag1", "T")]);
        let (stats, out) = run(vec![&r1, &r2], 2, &params::Runtime::new(2)).unwrap();
        assert_eq!(stats.pairs, 2);
        assert_eq!(names(&out[1]), vec!["@frag1/2", "@frag2/2"]);
    }

    #[test]
    fn interleaved_input_to_two_outputs() {
        let r = fastq(&[("A/1", "A"), ("A/2", "C"), ("B/1", "G")]);
        let (stats, out) = run(vec![&r], 2, &params::Runtime::new(1)).unwrap();
        assert_eq!((stats.pairs, stats.singles), (1, 1));
        assert_eq!(names(&out[0]), vec!["@A/1", "@B"]);
        assert_eq!(names(&out[1]), vec!["@A/2"]);
    }

    #[test]
    fn memory_limit() {
        let mut runtime = params::Runtime::new(2);
        runtime.spill = SpillThresholds {
            page_entries: 1,
            page_bytes: 0,
            abandon_bytes: 1,
        };
        let r1 = fastq(&[("A/1", "A"), ("B/1", "C"), ("C/1", "G")]);
        let r2 = fastq(&[("X/2", "A"), ("Y/2", "C"), ("Z/2", "G")]);
        let err = run(vec![&r1, &r2], 2, &runtime).unwrap_err();
        assert!(err.is_memory_limit());
    }

    #[test]
    fn stream_count_checked() {
        let r = fastq(&[("A", "A")]);
        assert!(matches!(
            run(vec![&r, &r, &r], 1, &params::Runtime::new(2)),
            Err(NormalizeError::Config { .. })
        ));
    }
}
