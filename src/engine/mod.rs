//! Everything that touches the external scan engine: building its argument
//! vector, running the process, scraping progress and decoding its result.

pub mod args;
pub mod decode;
pub mod progress;
pub mod runner;

pub use args::build_args;
pub use decode::{ScanOutcome, ScanReport};
pub use runner::{EngineCommand, EngineEvent, EngineOutput, EngineProcess};
