pub mod constants;
pub mod normalize;

pub use normalize::Normalize;
pub use normalize::NormalizeCMD;
