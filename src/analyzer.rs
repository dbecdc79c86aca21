use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::net::IpAddr;

use crate::engine::decode::ScanReport;
use crate::rules::{self, Severity};

/// An open port that matched a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub host: String,
    pub port: u16,
    pub service: String,
    pub severity: Severity,
    pub issue: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeveritySummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeveritySummary {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

/// Match every open port in the report against the rule table.
///
/// Output is ordered by host, then port, so repeated calls on the same
/// report give identical results. Ports without a rule are skipped.
pub fn analyze(report: &ScanReport) -> Vec<Finding> {
    let mut findings: Vec<Finding> = report
        .hosts
        .iter()
        .flat_map(|host| {
            host.ports
                .iter()
                .filter(|port| port.is_open())
                .filter_map(move |port| {
                    let rule = rules::lookup(port.port)?;
                    Some(Finding {
                        host: host.target.clone(),
                        port: port.port,
                        service: rule.service.to_string(),
                        severity: rule.severity,
                        issue: rule.issue.to_string(),
                        recommendation: rule.recommendation.to_string(),
                    })
                })
        })
        .collect();

    findings.sort_by(|a, b| compare_hosts(&a.host, &b.host).then(a.port.cmp(&b.port)));
    // A port reported under both tcp and udp matches the same rule twice.
    findings.dedup();

    log::debug!(
        "[analyzer] analyze: hosts={} open_ports={} findings={}",
        report.hosts.len(),
        report.open_port_count(),
        findings.len()
    );
    findings
}

pub fn summarize(findings: &[Finding]) -> SeveritySummary {
    findings.iter().fold(SeveritySummary::default(), |mut acc, f| {
        match f.severity {
            Severity::Critical => acc.critical += 1,
            Severity::High => acc.high += 1,
            Severity::Medium => acc.medium += 1,
            Severity::Low => acc.low += 1,
        }
        acc
    })
}

/// Addresses sort numerically and before hostnames; hostnames sort lexically.
fn compare_hosts(a: &str, b: &str) -> Ordering {
    match (a.parse::<IpAddr>(), b.parse::<IpAddr>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
