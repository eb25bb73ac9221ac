// This software is released under the MIT license.
// See file LICENSE for full license details.
use anyhow::{bail, Context, Result};
use clap::Args;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use super::core::{params, Normalize, SpillThresholds};
use crate::fileformat::QualityEncoding;

#[derive(Args)]
pub struct NormalizeCMD {
    // FASTQ for mate 1, or the only input
    #[arg(long = "r1", value_parser)]
    pub path_forward: PathBuf,

    // Optional: FASTQ for mate 2
    #[arg(long = "r2", value_parser)]
    pub path_reverse: Option<PathBuf>,

    // Output for mate 1 and orphans; gzip-compressed if it ends in .gz
    #[arg(short = 'o', long = "out1", value_parser)]
    pub path_output_forward: PathBuf,

    // Optional: output for mate 2. Without it pairs are interleaved in --out1
    #[arg(long = "out2", value_parser)]
    pub path_output_reverse: Option<PathBuf>,

    // Optional: rename reads to "<prefix>.<counter> <name>"
    #[arg(long = "prefix", value_parser)]
    pub prefix: Option<String>,

    // Accept U in reads and write it as T
    #[arg(long = "convert-uracil")]
    pub convert_uracil: bool,

    // Accept reads with no bases
    #[arg(long = "allow-empty")]
    pub allow_empty: bool,

    // Do not check that the '+' line repeats the read name
    #[arg(long = "no-quality-name-check")]
    pub no_quality_name_check: bool,

    // Optional: sanger, illumina or solexa. Detected from the input if not given
    #[arg(long = "encoding", value_parser)]
    pub encoding: Option<QualityEncoding>,

    // Optional: spill after this many buffered read names (0 = never)
    #[arg(long = "page-entries", value_parser = clap::value_parser!(u64))]
    pub page_entries: Option<u64>,

    // Optional: spill after this many buffered bytes (0 = never)
    #[arg(long = "page-bytes", value_parser = clap::value_parser!(u64))]
    pub page_bytes: Option<u64>,

    // Optional: fail once this many bytes have been spilled (0 = unlimited)
    #[arg(long = "abandon-bytes", value_parser = clap::value_parser!(u64))]
    pub abandon_bytes: Option<u64>,

    // Optional: parent directory for spill files. System temp dir if not given
    #[arg(short = 't', long = "tmp", value_parser)]
    pub path_tmp: Option<PathBuf>,

    // Optional: reads per hand-off between reader threads and the pairing engine
    #[arg(long = "batch-size", value_parser = clap::value_parser!(usize))]
    pub batch_size: Option<usize>,
}

impl NormalizeCMD {
    /// Run the commandline option.
    /// Normalizes qualities to Phred+33 and writes mates as ordered pairs
    pub fn try_execute(&mut self) -> Result<()> {
        let mut path_inputs = vec![self.path_forward.clone()];
        path_inputs.extend(self.path_reverse.iter().cloned());
        for path in path_inputs.iter() {
            verify_input_fq_file(path)?;
        }

        let mut path_outputs = vec![self.path_output_forward.clone()];
        path_outputs.extend(self.path_output_reverse.iter().cloned());

        let defaults = SpillThresholds::for_inputs(path_inputs.len());
        let spill = SpillThresholds {
            page_entries: self.page_entries.unwrap_or(defaults.page_entries),
            page_bytes: self.page_bytes.unwrap_or(defaults.page_bytes),
            abandon_bytes: self.abandon_bytes.unwrap_or(defaults.abandon_bytes),
        };

        let mut params_runtime = params::Runtime::new(path_inputs.len());
        params_runtime.prefix = self.prefix.clone();
        params_runtime.convert_uracil = self.convert_uracil;
        params_runtime.allow_empty = self.allow_empty;
        params_runtime.validate_quality_name = !self.no_quality_name_check;
        params_runtime.encoding = self.encoding;
        params_runtime.spill = spill;

        let mut params_threading = params::Threading::default();
        if let Some(batch_size) = self.batch_size {
            params_threading.batch_size = batch_size;
        }

        let params_io = params::IO {
            path_inputs,
            path_outputs,
            path_tmp: self.path_tmp.clone(),
        };

        let result = Normalize::normalize(
            Arc::new(params_io),
            Arc::new(params_runtime),
            Arc::new(params_threading),
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_memory_limit() => Err(e).context(
                "Too much data was spilled to disk; raise --abandon-bytes (0 = unlimited) or split the input",
            ),
            Err(e) => Err(e.into()),
        }
    }
}

/////// Check that the specified file is a readable FASTQ file
fn verify_input_fq_file(path_in: &PathBuf) -> Result<()> {
    let file = File::open(path_in)
        .with_context(|| format!("Cannot open input file {}", path_in.display()))?;
    if file.metadata()?.len() == 0 {
        log::warn!("Input file {} is empty", path_in.display());
    }

    let filename = path_in.to_string_lossy();
    let known = [".fq", ".fastq", ".fq.gz", ".fastq.gz", ".fq.bz2", ".fastq.bz2"];
    if !known.iter().any(|ext| filename.ends_with(ext)) {
        bail!("Input file must be a fastq file: {}", path_in.display());
    }
    Ok(())
}
