//! The operations exposed to callers: CLI, HTTP or RPC layers bind to
//! `ScanService` and nothing else.

use std::sync::Arc;

use crate::broadcast::{Broadcaster, SubscriberId, Subscription};
use crate::config::Config;
use crate::error::ScanError;
use crate::history::HistoryStore;
use crate::registry::JobRegistry;
use crate::target;
use crate::types::{HistoryEntry, JobId, OutputFormat, ScanJob, ScanRequest};

/// Inbound start-scan call. Unset fields take the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartScan {
    pub targets: Vec<String>,
    pub ports: Option<String>,
    pub timeout_secs: Option<u64>,
    pub detection: bool,
    pub format: Option<OutputFormat>,
}

impl StartScan {
    pub fn new(targets: Vec<String>) -> Self {
        Self {
            targets,
            ..Self::default()
        }
    }

    pub fn ports(mut self, ports: impl Into<String>) -> Self {
        self.ports = Some(ports.into());
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn detection(mut self, detection: bool) -> Self {
        self.detection = detection;
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = Some(format);
        self
    }
}

pub struct ScanService {
    config: Config,
    registry: Arc<JobRegistry>,
    events: Arc<Broadcaster>,
}

impl ScanService {
    pub fn new(config: Config) -> Result<Self, ScanError> {
        config.validate()?;
        let events = Arc::new(Broadcaster::new(config.subscriber_queue));
        let history = Arc::new(HistoryStore::new(config.history_capacity));
        let registry = Arc::new(JobRegistry::new(
            config.engine.clone(),
            history,
            Arc::clone(&events),
            config.stop_grace,
            config.job_retention,
        ));
        log::info!(
            "[service] new: engine={} history={} retention={}",
            config.engine.program,
            config.history_capacity,
            config.job_retention
        );
        Ok(Self { config, registry, events })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn start_scan(&self, scan: StartScan) -> Result<JobId, ScanError> {
        let request = ScanRequest {
            targets: scan.targets,
            ports: scan.ports.unwrap_or_else(|| self.config.default_ports.clone()),
            timeout_secs: scan.timeout_secs.unwrap_or(self.config.default_timeout_secs),
            detection: scan.detection,
            format: scan.format.unwrap_or(self.config.default_format),
        };
        self.registry.submit(request)
    }

    /// Acknowledges whether a running job was stopped.
    pub fn stop_scan(&self, id: &JobId) -> bool {
        self.registry.stop(id)
    }

    pub fn get_job(&self, id: &JobId) -> Result<ScanJob, ScanError> {
        self.registry.get(id).ok_or(ScanError::NotFound(*id))
    }

    pub fn list_history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.registry.list(limit)
    }

    pub fn active_jobs(&self) -> Vec<ScanJob> {
        self.registry.active()
    }

    /// Scan a whole network. Quick mode uses a short port list and timeout;
    /// otherwise the top-100 ports and the default timeout are used.
    pub fn discover(&self, network: &str, quick: bool) -> Result<JobId, ScanError> {
        let net = target::discovery_network(network)?;
        let (ports, timeout_secs) = if quick {
            (self.config.discovery.quick_ports.clone(), self.config.discovery.quick_timeout_secs)
        } else {
            (top_ports_spec(), self.config.default_timeout_secs)
        };
        log::info!("[service] discover: input={} network={} quick={}", network, net, quick);

        let request = ScanRequest {
            targets: vec![net.to_string()],
            ports,
            timeout_secs,
            detection: false,
            format: OutputFormat::Json,
        };
        self.registry.submit(request)
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.events.unsubscribe(id)
    }
}

// Top 100 most common ports
const TOP_100_PORTS: [u16; 100] = [
    7, 9, 13, 21, 22, 23, 25, 26, 37, 53,
    79, 80, 81, 88, 106, 110, 111, 113, 119, 135,
    139, 143, 144, 179, 199, 389, 427, 443, 444, 445,
    465, 513, 514, 515, 543, 544, 548, 554, 587, 631,
    646, 873, 990, 993, 995, 1025, 1026, 1027, 1028, 1029,
    1110, 1433, 1720, 1723, 1755, 1900, 2000, 2001, 2049, 2121,
    2717, 3000, 3128, 3306, 3389, 3986, 4899, 5000, 5009, 5051,
    5060, 5101, 5190, 5357, 5432, 5631, 5666, 5800, 5900, 6000,
    6001, 6646, 7070, 8000, 8008, 8009, 8080, 8081, 8443, 8888,
    9100, 9999, 10000, 32768, 49152, 49153, 49154, 49155, 49156, 49157,
];

fn top_ports_spec() -> String {
    TOP_100_PORTS.iter().map(u16::to_string).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineCommand;
    use crate::types::validate_port_spec;

    fn service() -> ScanService {
        ScanService::new(Config::default().with_engine(EngineCommand::new("/nonexistent/engine"))).unwrap()
    }

    #[test]
    fn test_top_ports_unique_and_valid() {
        let mut ports = TOP_100_PORTS.to_vec();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 100);
        assert!(validate_port_spec(&top_ports_spec()).is_ok());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(ScanService::new(Config::default().with_history_capacity(0)).is_err());
    }

    #[tokio::test]
    async fn test_start_scan_applies_defaults() {
        let svc = service();
        let id = svc.start_scan(StartScan::new(vec!["10.0.0.5".into()])).unwrap();
        let job = svc.get_job(&id).unwrap();
        assert_eq!(job.request.ports, svc.config().default_ports);
        assert_eq!(job.request.timeout_secs, svc.config().default_timeout_secs);
        assert_eq!(job.request.format, OutputFormat::Json);
        assert!(!job.request.detection);
        // Still pending: only running jobs can be stopped.
        assert_eq!(job.state, crate::types::JobState::Pending);
        assert!(!svc.stop_scan(&id));
    }

    #[tokio::test]
    async fn test_discover_quick_mode() {
        let svc = service();
        let id = svc.discover("192.168.1.77", true).unwrap();
        let job = svc.get_job(&id).unwrap();
        assert_eq!(job.request.targets, vec!["192.168.1.0/24".to_string()]);
        assert_eq!(job.request.ports, crate::config::QUICK_DISCOVERY_PORTS);
        assert_eq!(job.request.timeout_secs, 2);
    }

    #[tokio::test]
    async fn test_discover_full_mode() {
        let svc = service();
        let id = svc.discover("10.0.0.0/16", false).unwrap();
        let job = svc.get_job(&id).unwrap();
        assert_eq!(job.request.targets, vec!["10.0.0.0/16".to_string()]);
        assert_eq!(job.request.ports.split(',').count(), 100);
        assert_eq!(job.request.timeout_secs, svc.config().default_timeout_secs);
    }

    #[tokio::test]
    async fn test_discover_rejects_hostnames() {
        let svc = service();
        assert!(matches!(svc.discover("intranet.local", true), Err(ScanError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_get_unknown_job() {
        let svc = service();
        let id = JobId::new();
        assert_eq!(svc.get_job(&id).unwrap_err(), ScanError::NotFound(id));
    }
}
