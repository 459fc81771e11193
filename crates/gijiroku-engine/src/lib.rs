pub mod intake;
pub mod pipeline;

pub use intake::{AudioFormat, Intake, IntakeConfig, normalize_mime, sniff_format};
pub use pipeline::{Engine, EngineConfig};
