pub mod analyzer;
pub mod broadcast;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod logging;
pub mod pretty;
pub mod registry;
pub mod rules;
pub mod service;
pub mod target;
pub mod types;

// Re-export key types and functions at the crate root
pub use analyzer::{Finding, SeveritySummary};
pub use broadcast::{Event, SubscriberId, Subscription};
pub use config::Config;
pub use engine::{EngineCommand, ScanOutcome, ScanReport};
pub use error::ScanError;
pub use logging::{LogTarget, get_log_file_path, init_logging};
pub use rules::Severity;
pub use service::{ScanService, StartScan};
pub use target::Target;
pub use types::{HistoryEntry, JobId, JobState, OutputFormat, ScanJob, ScanRequest};
