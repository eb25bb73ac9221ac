// This software is released under the MIT license.
// See file LICENSE for full license details.
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read as IoRead, Write};
use std::path::{Path, PathBuf};

use super::read::Read;
use super::readname::{self, NameStyle};
use crate::runtime::{NormalizeError, Result};

const NAME_MARKER: u8 = b'@';
const QUALITY_NAME_MARKER: u8 = b'+';

#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Accept records with zero bases and qualities
    pub allow_empty: bool,
    /// Accept U/u in the base line
    pub allow_uracil: bool,
    /// Require a non-empty '+' line to repeat the header
    pub validate_quality_name: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        ParserOptions {
            allow_empty: false,
            allow_uracil: false,
            validate_quality_name: true,
        }
    }
}

///////////////////////////////
/// Pulls one read at a time out of a FASTQ byte stream.
///
/// Bases run until the '+' sentinel line, so wrapped sequences are accepted;
/// qualities are read until they cover the bases, over at most as many
/// lines as the bases took. The name style of the
/// first record is kept for the whole stream. All counters live in the
/// parser instance.
pub struct FastqParser<R> {
    reader: R,
    options: ParserOptions,
    stream_token: String,
    name_style: Option<NameStyle>,
    line_no: u64,
    reads_parsed: u64,
    line: Vec<u8>,
}

impl<R: BufRead> FastqParser<R> {
    /// `stream_token` is the mate index given to reads whose name carries none
    pub fn new(reader: R, options: ParserOptions, stream_token: String) -> FastqParser<R> {
        FastqParser {
            reader,
            options,
            stream_token,
            name_style: None,
            line_no: 0,
            reads_parsed: 0,
            line: Vec::with_capacity(256),
        }
    }

    pub fn name_style(&self) -> Option<NameStyle> {
        self.name_style
    }

    pub fn reads_parsed(&self) -> u64 {
        self.reads_parsed
    }

    /// Read the next line into the buffer, without line terminator. False at end of stream.
    fn next_line(&mut self) -> Result<bool> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line)?;
        if n == 0 {
            return Ok(false);
        }
        self.line_no += 1;
        while matches!(self.line.last(), Some(b'\n') | Some(b'\r')) {
            self.line.pop();
        }
        Ok(true)
    }

    /// Parse the next record, or None at the end of the stream
    pub fn next_read(&mut self) -> Result<Option<Read>> {
        // Header, skipping blank lines between records
        loop {
            if !self.next_line()? {
                return Ok(None);
            }
            if !self.line.is_empty() {
                break;
            }
        }
        let header_line = self.line_no;
        if self.line[0] != NAME_MARKER {
            return Err(NormalizeError::format(
                Some(header_line),
                None,
                format!(
                    "expected '@' at start of record, found '{}'",
                    String::from_utf8_lossy(&self.line)
                ),
            ));
        }
        let header = String::from_utf8_lossy(&self.line[1..]).trim_end().to_string();
        let parsed = self.parse_name(&header, header_line)?;
        let name = parsed.name.clone();

        // Bases up to the '+' sentinel
        let mut bases: Vec<u8> = Vec::new();
        let mut sequence_lines: usize = 0;
        loop {
            if !self.next_line()? {
                return Err(NormalizeError::format(
                    Some(self.line_no),
                    Some(&name),
                    "unexpected end of file before '+' line",
                ));
            }
            if self.line.first() == Some(&QUALITY_NAME_MARKER) {
                break;
            }
            if self.line.first() == Some(&NAME_MARKER) {
                return Err(NormalizeError::format(
                    Some(self.line_no),
                    Some(&name),
                    "found a new header before the '+' line",
                ));
            }
            bases.extend_from_slice(&self.line);
            sequence_lines += 1;
        }

        // Quality name, optionally repeating the header
        if self.options.validate_quality_name && self.line.len() > 1 {
            let quality_name = String::from_utf8_lossy(&self.line[1..]);
            let quality_name = quality_name.trim_end();
            if quality_name != header && quality_name != name {
                return Err(NormalizeError::format(
                    Some(self.line_no),
                    Some(&name),
                    format!("quality name '{}' does not match read name", quality_name),
                ));
            }
        }

        // Qualities until they cover the bases, spread over no more lines
        // than the bases were
        let mut qualities: Vec<u8> = Vec::with_capacity(bases.len());
        for _ in 0..sequence_lines.max(1) {
            if !self.next_line()? {
                return Err(NormalizeError::format(
                    Some(self.line_no),
                    Some(&name),
                    "unexpected end of file in quality line",
                ));
            }
            self.append_qualities(&mut qualities, &name)?;
            if qualities.len() >= bases.len() {
                break;
            }
        }

        if qualities.len() != bases.len() {
            return Err(NormalizeError::format(
                Some(self.line_no),
                Some(&name),
                format!(
                    "{} bases but {} quality values",
                    bases.len(),
                    qualities.len()
                ),
            ));
        }
        if bases.is_empty() && !self.options.allow_empty {
            return Err(NormalizeError::format(
                Some(header_line),
                Some(&name),
                "empty read (enable allow-empty to accept)",
            ));
        }
        self.validate_bases(&bases, header_line, &name)?;

        self.reads_parsed += 1;
        Ok(Some(Read {
            name: parsed.name,
            tail: parsed.tail,
            bases,
            qualities,
            pair_index_token: parsed.token.unwrap_or_else(|| self.stream_token.clone()),
        }))
    }

    fn parse_name(&mut self, header: &str, line: u64) -> Result<readname::ParsedName> {
        let style = match self.name_style {
            Some(style) => style,
            None => {
                let style = readname::detect_style(header);
                debug!("Read name style for stream {}: {}", self.stream_token, style);
                self.name_style = Some(style);
                style
            }
        };
        let parsed = readname::parse_header(header, style).ok_or_else(|| {
            NormalizeError::format(
                Some(line),
                Some(header),
                format!("read name does not follow the {} style of this file", style),
            )
        })?;
        if parsed.name.is_empty() {
            return Err(NormalizeError::format(Some(line), None, "empty read name"));
        }
        Ok(parsed)
    }

    /// Either printable quality characters, or whitespace/comma separated scores
    fn append_qualities(&self, qualities: &mut Vec<u8>, name: &str) -> Result<()> {
        if self.line.iter().all(|c| (b'!'..=b'~').contains(c)) {
            qualities.extend_from_slice(&self.line);
            return Ok(());
        }
        let text = String::from_utf8_lossy(&self.line);
        for field in text.split(|c: char| c == ' ' || c == ',' || c == '\t') {
            if field.is_empty() {
                continue;
            }
            let score: i32 = field.parse().map_err(|_| {
                NormalizeError::format(
                    Some(self.line_no),
                    Some(name),
                    format!("invalid quality value '{}'", field),
                )
            })?;
            let c = score + b'!' as i32;
            if !(0..=b'~' as i32).contains(&c) {
                return Err(NormalizeError::format(
                    Some(self.line_no),
                    Some(name),
                    format!("quality score {} out of range", score),
                ));
            }
            qualities.push(c as u8);
        }
        Ok(())
    }

    fn validate_bases(&self, bases: &[u8], line: u64, name: &str) -> Result<()> {
        let allow_uracil = self.options.allow_uracil;
        let invalid: BTreeSet<char> = bases
            .iter()
            .filter(|b| !is_valid_base(**b, allow_uracil))
            .map(|b| *b as char)
            .collect();
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(NormalizeError::invalid_bases(
                invalid.into_iter().collect::<String>(),
                Some(line),
                Some(name),
            ))
        }
    }
}

/// IUPAC nucleotide codes, '.' for no-call, and U when uracil is allowed
pub fn is_valid_base(b: u8, allow_uracil: bool) -> bool {
    match b.to_ascii_uppercase() {
        b'A' | b'C' | b'G' | b'T' | b'N' | b'R' | b'Y' | b'S' | b'W' | b'K' | b'M' | b'B'
        | b'D' | b'H' | b'V' | b'.' => true,
        b'U' => allow_uracil,
        _ => false,
    }
}

///////////////////////////////
/// Open a FASTQ file, decompressing gzip/bzip2 on the fly
pub fn open_fastq(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|e| {
        NormalizeError::Io(std::io::Error::new(
            e.kind(),
            format!("Could not open fastq file {}: {}", path.display(), e),
        ))
    })?;
    let (reader, compression) = niffler::send::get_reader(Box::new(file)).map_err(|e| {
        NormalizeError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Could not open fastq file {}: {}", path.display(), e),
        ))
    })?;
    debug!("Opened file {} with compression {:?}", path.display(), compression);
    Ok(Box::new(BufReader::new(reader)))
}

/// Wrap any reader for the parser
pub fn buffered<R: IoRead + Send + 'static>(reader: R) -> Box<dyn BufRead + Send> {
    Box::new(BufReader::new(reader))
}

///////////////////////////////
/// Output file, gzip-compressed when the name ends in ".gz"
pub enum FastqSink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FastqSink {
    pub fn create(path: &PathBuf) -> Result<FastqSink> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        if path.to_string_lossy().ends_with(".gz") {
            Ok(FastqSink::Gzip(GzEncoder::new(writer, Compression::default())))
        } else {
            Ok(FastqSink::Plain(writer))
        }
    }

    /// Flush everything, writing the gzip trailer if needed
    pub fn finish(self) -> Result<()> {
        match self {
            FastqSink::Plain(mut w) => w.flush()?,
            FastqSink::Gzip(gz) => {
                let mut w = gz.finish()?;
                w.flush()?;
            }
        }
        Ok(())
    }
}

impl Write for FastqSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            FastqSink::Plain(w) => w.write(buf),
            FastqSink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            FastqSink::Plain(w) => w.flush(),
            FastqSink::Gzip(w) => w.flush(),
        }
    }
}

////////// Write one FASTQ read
pub fn write_fastq_read<W: Write>(
    writer: &mut W,
    head: &str,
    seq: &[u8],
    qual: &[u8],
) -> std::io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(head.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")?;
    Ok(())
}
