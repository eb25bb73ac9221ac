// This software is released under the MIT license.
// See file LICENSE for full license details.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NormalizeError>;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("Malformed FASTQ record{}: {}", NormalizeError::format_context(line, read_name), msg)]
    Format {
        line: Option<u64>,
        read_name: Option<String>,
        msg: String,
    },

    #[error(
        "Invalid base character(s) '{}' in read{}",
        chars,
        NormalizeError::format_context(line, read_name)
    )]
    InvalidBaseCharacter {
        chars: String,
        line: Option<u64>,
        read_name: Option<String>,
    },

    #[error("Mate {} of read '{}' was seen more than once", ordinal + 1, key)]
    DuplicateMate { key: String, ordinal: usize },

    #[error(
        "Unexpected pair index token '{}'; already seen {:?} and at most two are allowed",
        token,
        known
    )]
    UnexpectedIndexToken { token: String, known: Vec<String> },

    #[error(
        "Spilled {} bytes to disk which reaches the abandon limit of {} bytes",
        spilled_bytes,
        limit_bytes
    )]
    MemoryLimitExceeded { spilled_bytes: u64, limit_bytes: u64 },

    #[error("Cannot {} while the pairing engine is {}", operation, state)]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    #[error("Reader for input stream {} stopped without finishing", stream)]
    ProducerLost { stream: usize },

    #[error("Invalid configuration: {}", msg)]
    Config { msg: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize spill file: {0}")]
    Spill(#[from] bincode::Error),
}

impl NormalizeError {
    #[cold]
    pub fn format<M: Into<String>>(line: Option<u64>, read_name: Option<&str>, msg: M) -> Self {
        NormalizeError::Format {
            line,
            read_name: read_name.map(|n| n.to_string()),
            msg: msg.into(),
        }
    }

    #[cold]
    pub fn invalid_bases<C: Into<String>>(chars: C, line: Option<u64>, read_name: Option<&str>) -> Self {
        NormalizeError::InvalidBaseCharacter {
            chars: chars.into(),
            line,
            read_name: read_name.map(|n| n.to_string()),
        }
    }

    #[cold]
    pub fn duplicate_mate<K: Into<String>>(key: K, ordinal: usize) -> Self {
        NormalizeError::DuplicateMate {
            key: key.into(),
            ordinal,
        }
    }

    #[cold]
    pub fn config<M: Into<String>>(msg: M) -> Self {
        NormalizeError::Config { msg: msg.into() }
    }

    /// True for the error raised when too much was spilled to disk.
    /// Callers can suggest raising the abandon limit or shrinking the input.
    pub fn is_memory_limit(&self) -> bool {
        matches!(self, NormalizeError::MemoryLimitExceeded { .. })
    }

    pub fn format_context(line: &Option<u64>, read_name: &Option<String>) -> String {
        match (line, read_name) {
            (Some(l), Some(n)) => format!(" at line {} (read '{}')", l, n),
            (Some(l), None) => format!(" at line {}", l),
            (None, Some(n)) => format!(" (read '{}')", n),
            (None, None) => String::new(),
        }
    }
}
