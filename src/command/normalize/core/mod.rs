#[allow(clippy::module_inception)]
pub mod core;
pub mod emit;
pub mod generation;
pub mod pairing;
pub mod params;
pub mod scheduler;

pub use self::core::Normalize;
pub use self::core::RunStats;
pub use pairing::{EngineState, PairingEngine, SpillAccounting, SpillThresholds};
