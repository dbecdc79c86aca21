use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::types::OutputFormat;

const OPEN_STATE: &str = "open";

/// Structured report emitted by the engine in `json` mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub hosts: Vec<HostReport>,
    pub scan_info: ScanInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostReport {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortReport>,
    #[serde(default)]
    pub scan_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortReport {
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub total_hosts: usize,
    #[serde(default)]
    pub scan_time: f64,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl PortReport {
    pub fn is_open(&self) -> bool {
        self.state.eq_ignore_ascii_case(OPEN_STATE)
    }
}

impl ScanReport {
    pub fn open_port_count(&self) -> usize {
        self.hosts
            .iter()
            .map(|h| h.ports.iter().filter(|p| p.is_open()).count())
            .sum()
    }
}

/// What a completed job produced: a decoded report, or the engine's text as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScanOutcome {
    Structured(ScanReport),
    Raw(String),
}

impl ScanOutcome {
    pub fn report(&self) -> Option<&ScanReport> {
        match self {
            ScanOutcome::Structured(report) => Some(report),
            ScanOutcome::Raw(_) => None,
        }
    }
}

/// Decode a report from engine stdout.
///
/// Engines may print banner or progress lines around the payload, so when the
/// whole output is not valid JSON the outermost `{ ... }` span is tried.
pub fn decode_report(stdout: &str) -> Result<ScanReport, ScanError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(ScanError::DecodeFailure("engine produced no output".into()));
    }

    let first_error = match serde_json::from_str::<ScanReport>(trimmed) {
        Ok(report) => return Ok(report),
        Err(e) => e,
    };

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start > 0 || end + 1 < trimmed.len() {
            if let Ok(report) = serde_json::from_str::<ScanReport>(&trimmed[start..=end]) {
                log::debug!("[engine::decode] decoded_embedded_payload: offset={} len={}", start, end + 1 - start);
                return Ok(report);
            }
        }
    }

    Err(ScanError::DecodeFailure(first_error.to_string()))
}

/// Turn engine stdout into a job result according to the requested format.
pub fn interpret(format: OutputFormat, stdout: &str) -> Result<ScanOutcome, ScanError> {
    if format.is_structured() {
        decode_report(stdout).map(ScanOutcome::Structured)
    } else {
        Ok(ScanOutcome::Raw(stdout.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "hosts": [
            {
                "target": "10.0.0.5",
                "hostname": "files.lan",
                "ports": [
                    {"port": 21, "protocol": "tcp", "state": "open", "service": "ftp"},
                    {"port": 80, "protocol": "tcp", "state": "closed"},
                    {"port": 445, "protocol": "tcp", "state": "OPEN", "service": "microsoft-ds", "version": "SMBv2"}
                ],
                "scan_time": 1.5
            }
        ],
        "scan_info": {"version": "0.3.1", "total_hosts": 1, "scan_time": 1.6}
    }"#;

    #[test]
    fn test_decode_report() {
        let report = decode_report(SAMPLE).unwrap();
        assert_eq!(report.hosts.len(), 1);
        assert_eq!(report.hosts[0].hostname.as_deref(), Some("files.lan"));
        assert_eq!(report.hosts[0].ports[2].version.as_deref(), Some("SMBv2"));
        assert_eq!(report.scan_info.total_hosts, 1);
        assert_eq!(report.open_port_count(), 2);
    }

    #[test]
    fn test_decode_report_with_surrounding_noise() {
        let noisy = format!("Starting engine 0.3.1\n[ 50%]\n{}\nDone.\n", SAMPLE);
        let report = decode_report(&noisy).unwrap();
        assert_eq!(report.open_port_count(), 2);
    }

    #[test]
    fn test_decode_report_defaults_optional_fields() {
        let minimal = r#"{"hosts":[{"target":"h","ports":[{"port":22,"state":"open"}]}],"scan_info":{}}"#;
        let report = decode_report(minimal).unwrap();
        assert_eq!(report.hosts[0].ports[0].protocol, "tcp");
        assert_eq!(report.hosts[0].scan_time, 0.0);
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(decode_report(""), Err(ScanError::DecodeFailure(_))));
        assert!(matches!(decode_report("PORT STATE\n22 open"), Err(ScanError::DecodeFailure(_))));
        assert!(matches!(decode_report(r#"{"hosts": 3}"#), Err(ScanError::DecodeFailure(_))));
    }

    #[test]
    fn test_interpret_text_keeps_raw() {
        let outcome = interpret(OutputFormat::Text, "22/tcp open ssh\n").unwrap();
        assert_eq!(outcome, ScanOutcome::Raw("22/tcp open ssh\n".into()));
        assert!(outcome.report().is_none());
    }

    #[test]
    fn test_interpret_json_requires_payload() {
        assert!(interpret(OutputFormat::Json, "not json").is_err());
        assert!(interpret(OutputFormat::Json, SAMPLE).unwrap().report().is_some());
    }
}
