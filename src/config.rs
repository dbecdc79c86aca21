use std::time::Duration;

use crate::broadcast::DEFAULT_SUBSCRIBER_QUEUE;
use crate::engine::EngineCommand;
use crate::error::ScanError;
use crate::history::DEFAULT_MAX_HISTORY_ENTRIES;
use crate::types::OutputFormat;

pub const DEFAULT_ENGINE_PROGRAM: &str = "rustmap";
pub const DEFAULT_PORTS: &str = "1-1000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_JOB_RETENTION: usize = 100;
pub const DEFAULT_STOP_GRACE_SECS: u64 = 3;
pub const QUICK_DISCOVERY_PORTS: &str = "21,22,23,80,443,445,3389,8080";
pub const QUICK_DISCOVERY_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub engine: EngineCommand,
    /// Entries kept by the history store.
    pub history_capacity: usize,
    /// Terminal job records kept for lookup by id.
    pub job_retention: usize,
    pub subscriber_queue: usize,
    pub default_ports: String,
    pub default_timeout_secs: u64,
    pub default_format: OutputFormat,
    /// How long a killed engine is given to exit before it is left behind.
    pub stop_grace: Duration,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub quick_ports: String,
    pub quick_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            quick_ports: QUICK_DISCOVERY_PORTS.to_string(),
            quick_timeout_secs: QUICK_DISCOVERY_TIMEOUT_SECS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineCommand::new(DEFAULT_ENGINE_PROGRAM),
            history_capacity: DEFAULT_MAX_HISTORY_ENTRIES,
            job_retention: DEFAULT_JOB_RETENTION,
            subscriber_queue: DEFAULT_SUBSCRIBER_QUEUE,
            default_ports: DEFAULT_PORTS.to_string(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            default_format: OutputFormat::Json,
            stop_grace: Duration::from_secs(DEFAULT_STOP_GRACE_SECS),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Config {
    pub fn with_engine(mut self, engine: EngineCommand) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_default_timeout(mut self, timeout_secs: u64) -> Self {
        self.default_timeout_secs = timeout_secs;
        self
    }

    pub fn with_job_retention(mut self, retention: usize) -> Self {
        self.job_retention = retention;
        self
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.engine.program.trim().is_empty() {
            return Err(ScanError::InvalidConfig("engine program is empty".into()));
        }
        if self.history_capacity == 0 {
            return Err(ScanError::InvalidConfig("history capacity must be at least 1".into()));
        }
        if self.job_retention == 0 {
            return Err(ScanError::InvalidConfig("job retention must be at least 1".into()));
        }
        if self.subscriber_queue == 0 {
            return Err(ScanError::InvalidConfig("subscriber queue must be at least 1".into()));
        }
        if self.default_timeout_secs == 0 || self.discovery.quick_timeout_secs == 0 {
            return Err(ScanError::InvalidConfig("timeouts must be at least one second".into()));
        }
        crate::types::validate_port_spec(&self.default_ports)
            .and_then(|_| crate::types::validate_port_spec(&self.discovery.quick_ports))
            .map_err(|e| ScanError::InvalidConfig(e.to_string()))?;
        Ok(())
    }
}
