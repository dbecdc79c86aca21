use std::time::Duration;

use crate::analyzer::{self, Finding};
use crate::broadcast::Event;
use crate::engine::ScanOutcome;
use crate::rules::{self, Severity};
use crate::types::{HistoryEntry, JobState, ScanJob};

const MAX_PORTS_DISPLAY: usize = 4;
const MAX_RAW_PREVIEW: usize = 200;
const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 3600;
const SEPARATOR_WIDTH: usize = 80;

fn state_icon(state: JobState) -> &'static str {
    match state {
        JobState::Pending => "⏳",
        JobState::Running => "🔄",
        JobState::Completed => "✅",
        JobState::Failed => "❌",
        JobState::Stopped => "⏹️",
    }
}

fn severity_icon(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔥",
        Severity::High => "🔴",
        Severity::Medium => "🟠",
        Severity::Low => "🟡",
    }
}

pub fn print_event(event: &Event) {
    match event {
        Event::Started { job_id } => println!("🔄 STARTED: job {}", job_id),
        Event::Progress { percent, .. } => println!("🔄 PROGRESS: {}%", percent),
        Event::Result { result, .. } => {
            print!("📦 RESULT: ");
            print_outcome(result);
        }
        Event::Findings { findings, .. } => {
            let summary = analyzer::summarize(findings);
            println!(
                "🛡️  FINDINGS: {} total ({} critical, {} high, {} medium, {} low)",
                summary.total(),
                summary.critical,
                summary.high,
                summary.medium,
                summary.low
            );
        }
        Event::Complete { duration_seconds, .. } => {
            println!("✅ COMPLETE: {}", format_duration(Duration::from_secs_f64(*duration_seconds)));
        }
        Event::Error { message, .. } => println!("❌ ERROR: {}", message),
        Event::Stopped { .. } => println!("⏹️  STOPPED"),
    }
}

fn print_outcome(outcome: &ScanOutcome) {
    match outcome {
        ScanOutcome::Structured(report) => {
            let open: Vec<String> = report
                .hosts
                .iter()
                .flat_map(|host| {
                    host.ports.iter().filter(|p| p.is_open()).map(move |p| {
                        let service = p.service.as_deref().unwrap_or("unknown");
                        format!("{}:{} {}", host.target, p.port, service.to_uppercase())
                    })
                })
                .collect();

            if open.is_empty() {
                println!("{} hosts, no open ports", report.hosts.len());
                return;
            }

            let shown = open.iter().take(MAX_PORTS_DISPLAY).cloned().collect::<Vec<_>>().join(", ");
            let ports_str = if open.len() > MAX_PORTS_DISPLAY {
                format!("{}, +{} more", shown, open.len() - MAX_PORTS_DISPLAY)
            } else {
                shown
            };
            println!("{} hosts, {} open ({})", report.hosts.len(), open.len(), ports_str);
        }
        ScanOutcome::Raw(text) => {
            let preview: String = text.chars().take(MAX_RAW_PREVIEW).collect();
            let ellipsis = if text.chars().count() > MAX_RAW_PREVIEW { "..." } else { "" };
            println!("raw output: {}{}", preview.trim_end(), ellipsis);
        }
    }
}

pub fn print_findings(findings: &[Finding]) {
    if findings.is_empty() {
        println!("  No risky services found");
        return;
    }
    for finding in findings {
        println!(
            "  {} {:<8} {}:{} {} - {}",
            severity_icon(finding.severity),
            finding.severity,
            finding.host,
            finding.port,
            finding.service,
            finding.issue
        );
        println!("     └─ {}", finding.recommendation);
    }
}

pub fn print_job(job: &ScanJob) {
    println!("{} {}: {}", state_icon(job.state), job.state.as_str().to_uppercase(), job.summary());
    println!("  └─ Job {} ({})", job.id, format_duration(Duration::from_secs_f64(job.duration_seconds())));
}

pub fn print_history(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("No finished scans");
        return;
    }
    for entry in entries {
        println!(
            "{} {} {} ({})",
            state_icon(entry.state),
            entry.ended_at.format("%Y-%m-%d %H:%M:%S"),
            entry.summary,
            format_duration(Duration::from_secs_f64(entry.duration_seconds))
        );
    }
}

pub fn print_rules() {
    print_header("Port risk rules");
    for rule in rules::all() {
        println!(
            "{} {:>5} {:<12} {:<8} {}",
            severity_icon(rule.severity),
            rule.port,
            rule.service,
            rule.severity,
            rule.issue
        );
    }
    print_separator();
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();

    if total_secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if total_secs < SECONDS_PER_MINUTE {
        format!("{}s", total_secs)
    } else if total_secs < SECONDS_PER_HOUR {
        format!("{}m{}s", total_secs / SECONDS_PER_MINUTE, total_secs % SECONDS_PER_MINUTE)
    } else {
        let hours = total_secs / SECONDS_PER_HOUR;
        let minutes = (total_secs % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE;
        format!("{}h{}m", hours, minutes)
    }
}

pub fn print_separator() {
    println!("{}", "─".repeat(SEPARATOR_WIDTH));
}

pub fn print_header(title: &str) {
    println!("🎯 {}", title);
    print_separator();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m5s");
        assert_eq!(format_duration(Duration::from_secs(7260)), "2h1m");
    }
}
