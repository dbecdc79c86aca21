use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::analyzer::Finding;
use crate::engine::decode::ScanOutcome;
use crate::error::ScanError;
use crate::target::Target;

const SUMMARY_TARGETS_SHOWN: usize = 3;

// An optional protocol prefix (`T:`, `U:`), then a port, a closed range or an
// open-ended range.
static PORT_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z]+:)?(?:\d+(?:-\d*)?|-\d*)$").expect("port item regex is valid")
});

/// Opaque handle for a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| ScanError::InvalidRequest(format!("malformed job id '{}': {}", s, e)))
    }
}

/// Result encoding requested from the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
        }
    }

    /// Whether the engine is expected to emit a decodable report.
    pub fn is_structured(&self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "text" | "txt" => Ok(OutputFormat::Text),
            other => Err(ScanError::InvalidRequest(format!("unsupported output format: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub targets: Vec<String>,
    pub ports: String,
    pub timeout_secs: u64,
    pub detection: bool,
    pub format: OutputFormat,
}

impl ScanRequest {
    pub fn new(targets: Vec<String>, ports: impl Into<String>) -> Self {
        Self {
            targets,
            ports: ports.into(),
            timeout_secs: crate::config::DEFAULT_TIMEOUT_SECS,
            detection: false,
            format: OutputFormat::Json,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_detection(mut self, detection: bool) -> Self {
        self.detection = detection;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Syntactic checks only; the engine decides whether targets and ports make sense.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.targets.is_empty() {
            return Err(ScanError::InvalidRequest("at least one target is required".into()));
        }
        for target in &self.targets {
            Target::parse(target)?;
        }
        validate_port_spec(&self.ports)?;
        if self.timeout_secs == 0 {
            return Err(ScanError::InvalidRequest("timeout must be at least one second".into()));
        }
        Ok(())
    }

    /// Short label used in summaries and logs, e.g. `10.0.0.5, 10.0.0.6 (+3 more)`.
    pub fn target_label(&self) -> String {
        let shown: Vec<&str> = self.targets.iter().take(SUMMARY_TARGETS_SHOWN).map(String::as_str).collect();
        let mut label = shown.join(", ");
        if self.targets.len() > SUMMARY_TARGETS_SHOWN {
            label.push_str(&format!(" (+{} more)", self.targets.len() - SUMMARY_TARGETS_SHOWN));
        }
        label
    }
}

/// Syntax check only: `80`, `1-1024`, `22,80,8000-8100`, `T:80,U:53`.
/// Whether the ports exist or a range is sensible is left to the engine.
/// Whitespace around items is ignored.
pub fn validate_port_spec(spec: &str) -> Result<(), ScanError> {
    if spec.trim().is_empty() {
        return Err(ScanError::InvalidRequest("port specification is empty".into()));
    }
    for item in spec.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(ScanError::InvalidRequest(format!("empty item in port specification '{}'", spec)));
        }
        if !PORT_ITEM_RE.is_match(item) {
            return Err(ScanError::InvalidRequest(format!("invalid port item '{}' in '{}'", item, spec)));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Stopped)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Running) => true,
            (JobState::Pending, JobState::Failed) => true,
            (JobState::Running, s) => s.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a job as held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    pub state: JobState,
    pub request: ScanRequest,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub progress: u8,
    /// Empty until the job is terminal.
    pub raw_output: String,
    pub result: Option<ScanOutcome>,
    pub error: Option<String>,
    pub findings: Vec<Finding>,
}

impl ScanJob {
    pub fn new(request: ScanRequest) -> Self {
        Self {
            id: JobId::new(),
            state: JobState::Pending,
            request,
            submitted_at: Utc::now(),
            started_at: None,
            ended_at: None,
            progress: 0,
            raw_output: String::new(),
            result: None,
            error: None,
            findings: Vec::new(),
        }
    }

    /// Seconds between start (or submission, if never started) and end or now.
    pub fn duration_seconds(&self) -> f64 {
        let start = self.started_at.unwrap_or(self.submitted_at);
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - start).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn summary(&self) -> String {
        let targets = self.request.target_label();
        match self.state {
            JobState::Pending => format!("queued scan of {}", targets),
            JobState::Running => format!("scanning {} ({}%)", targets, self.progress),
            JobState::Completed => match &self.result {
                Some(ScanOutcome::Structured(report)) => format!(
                    "scanned {}: {} hosts, {} open ports, {} findings",
                    targets,
                    report.hosts.len(),
                    report.open_port_count(),
                    self.findings.len()
                ),
                _ => format!("scanned {} (raw output)", targets),
            },
            JobState::Failed => format!(
                "scan of {} failed: {}",
                targets,
                self.error.as_deref().unwrap_or("unknown error")
            ),
            JobState::Stopped => format!("scan of {} stopped", targets),
        }
    }
}

/// Read-only record of a job that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: JobId,
    pub targets: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub summary: String,
    pub state: JobState,
}

impl HistoryEntry {
    pub fn from_job(job: &ScanJob) -> Self {
        Self {
            id: job.id,
            targets: job.request.targets.clone(),
            started_at: job.started_at.unwrap_or(job.submitted_at),
            ended_at: job.ended_at.unwrap_or_else(Utc::now),
            duration_seconds: job.duration_seconds(),
            summary: job.summary(),
            state: job.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(targets: &[&str], ports: &str) -> ScanRequest {
        ScanRequest::new(targets.iter().map(|t| t.to_string()).collect(), ports)
    }

    #[test]
    fn test_validate_accepts_common_specs() {
        assert!(request(&["10.0.0.5"], "21,23,445").validate().is_ok());
        assert!(request(&["example.com"], "1-1024").validate().is_ok());
        assert!(request(&["192.168.1.0/24"], " 22 , 80, 8000-8100 ").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_targets() {
        let err = request(&[], "80").validate().unwrap_err();
        assert!(matches!(err, ScanError::InvalidRequest(_)));
    }

    #[test]
    fn test_validate_rejects_bad_ports() {
        for spec in ["", " ", "80,", ",80", "http", "1-2-3", "80 443", "-p", "T:", "22;80"] {
            assert!(request(&["10.0.0.1"], spec).validate().is_err(), "spec {:?} accepted", spec);
        }
    }

    #[test]
    fn test_validate_leaves_port_semantics_to_engine() {
        for spec in ["0", "70000", "100-10", "T:80,U:53", "1-", "-1024", "-"] {
            assert!(request(&["10.0.0.1"], spec).validate().is_ok(), "spec {:?} rejected", spec);
        }
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        assert!(request(&["10.0.0.1"], "80").with_timeout(0).validate().is_err());
    }

    #[test]
    fn test_state_transitions() {
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Completed));
        assert!(JobState::Running.can_transition_to(JobState::Stopped));
        assert!(!JobState::Completed.can_transition_to(JobState::Failed));
        assert!(!JobState::Stopped.can_transition_to(JobState::Running));
        assert!(!JobState::Running.can_transition_to(JobState::Pending));
        assert!(JobState::Pending.can_transition_to(JobState::Failed));
        assert!(!JobState::Pending.can_transition_to(JobState::Stopped));
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_job_id_round_trip() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_target_label_truncates() {
        let req = request(&["a.example", "b.example", "c.example", "d.example", "e.example"], "80");
        assert_eq!(req.target_label(), "a.example, b.example, c.example (+2 more)");
    }

    #[test]
    fn test_history_entry_from_failed_job() {
        let mut job = ScanJob::new(request(&["10.0.0.9"], "22"));
        job.state = JobState::Failed;
        job.error = Some("unreachable".into());
        job.ended_at = Some(Utc::now());

        let entry = HistoryEntry::from_job(&job);
        assert_eq!(entry.id, job.id);
        assert_eq!(entry.state, JobState::Failed);
        assert!(entry.summary.contains("unreachable"));
        assert!(entry.duration_seconds >= 0.0);
    }
}
