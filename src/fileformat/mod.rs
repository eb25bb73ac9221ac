pub mod fastq;
pub mod quality;
pub mod read;
pub mod readname;

pub use fastq::FastqParser;
pub use fastq::FastqSink;
pub use fastq::ParserOptions;
pub use quality::Normalizer;
pub use quality::QualityDetector;
pub use quality::QualityEncoding;
pub use read::MateSlot;
pub use read::Read;
pub use readname::NameStyle;
