pub mod command;
pub mod fileformat;
pub mod runtime;

pub use command::normalize::core::params;
pub use command::normalize::{Normalize, RunStats};
pub use runtime::{NormalizeError, Result};
