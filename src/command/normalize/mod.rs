mod command;
pub mod core;

pub use command::NormalizeCMD;
pub use self::core::Normalize;
pub use self::core::RunStats;
