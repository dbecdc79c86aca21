//! Owner of every job's state.
//!
//! The registry is the only writer of job state. Each job runs as one tokio
//! task that drives the engine and reports back through the methods below.
//! State changes and the events they cause happen under the job's map entry
//! lock, so per-job events are published in transition order and nothing is
//! published for a job after its terminal event.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::analyzer;
use crate::broadcast::{Broadcaster, Event};
use crate::engine::decode::{self, ScanOutcome};
use crate::engine::{self, EngineCommand, EngineEvent, EngineOutput};
use crate::error::ScanError;
use crate::history::HistoryStore;
use crate::types::{HistoryEntry, JobId, JobState, ScanJob, ScanRequest};

struct JobRecord {
    job: ScanJob,
    cancel: CancellationToken,
}

enum Outcome {
    Completed { result: ScanOutcome, raw_output: String },
    Failed { error: ScanError, raw_output: String },
    Stopped,
}

impl Outcome {
    fn state(&self) -> JobState {
        match self {
            Outcome::Completed { .. } => JobState::Completed,
            Outcome::Failed { .. } => JobState::Failed,
            Outcome::Stopped => JobState::Stopped,
        }
    }
}

pub struct JobRegistry {
    jobs: DashMap<JobId, JobRecord>,
    finished: Mutex<VecDeque<JobId>>,
    history: Arc<HistoryStore>,
    events: Arc<Broadcaster>,
    engine: EngineCommand,
    stop_grace: Duration,
    retention: usize,
}

impl JobRegistry {
    pub fn new(
        engine: EngineCommand,
        history: Arc<HistoryStore>,
        events: Arc<Broadcaster>,
        stop_grace: Duration,
        retention: usize,
    ) -> Self {
        log::debug!(
            "[registry] new: engine={} stop_grace={}ms retention={}",
            engine.program,
            stop_grace.as_millis(),
            retention
        );
        Self {
            jobs: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            history,
            events,
            engine,
            stop_grace,
            retention: retention.max(1),
        }
    }

    /// Validate and register a job, then start it in the background.
    ///
    /// Returns as soon as the job exists in `Pending`. Must be called from
    /// within a tokio runtime.
    pub fn submit(self: &Arc<Self>, request: ScanRequest) -> Result<JobId, ScanError> {
        if let Err(e) = request.validate() {
            log::warn!("[registry] submit_rejected: error={}", e);
            return Err(e);
        }

        let job = ScanJob::new(request.clone());
        let id = job.id;
        let cancel = CancellationToken::new();
        self.jobs.insert(id, JobRecord { job, cancel: cancel.clone() });

        log::info!(
            "[registry] submitted: id={} targets={} ports={} timeout={}s format={} detection={}",
            id,
            request.target_label(),
            request.ports,
            request.timeout_secs,
            request.format,
            request.detection
        );

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.run_job(id, request, cancel).await;
        });

        Ok(id)
    }

    /// Stop a running job. Returns false for unknown, pending or terminal
    /// jobs without touching them. The engine is killed in the background.
    pub fn stop(&self, id: &JobId) -> bool {
        let stopped = self.finish(*id, Outcome::Stopped);
        log::info!("[registry] stop: id={} stopped={}", id, stopped);
        stopped
    }

    pub fn get(&self, id: &JobId) -> Option<ScanJob> {
        self.jobs.get(id).map(|record| record.job.clone())
    }

    /// Up to `limit` history entries, newest first.
    pub fn list(&self, limit: usize) -> Vec<HistoryEntry> {
        self.history.recent(limit)
    }

    /// Jobs that have not reached a terminal state, oldest submission first.
    pub fn active(&self) -> Vec<ScanJob> {
        let mut jobs: Vec<ScanJob> = self
            .jobs
            .iter()
            .filter(|record| !record.job.state.is_terminal())
            .map(|record| record.job.clone())
            .collect();
        jobs.sort_by_key(|job| job.submitted_at);
        jobs
    }

    async fn run_job(self: Arc<Self>, id: JobId, request: ScanRequest, cancel: CancellationToken) {
        let args = engine::build_args(&request);
        let mut process = match engine::runner::spawn(&self.engine, &args, self.stop_grace) {
            Ok(process) => process,
            Err(error) => {
                self.finish(id, Outcome::Failed { error, raw_output: String::new() });
                return;
            }
        };

        log::debug!("[registry] engine_spawned: id={} pid={:?}", id, process.id());

        if !self.mark_running(id) {
            process.terminate();
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    process.terminate();
                    while let Some(event) = process.next_event().await {
                        if let EngineEvent::Exited(output) | EngineEvent::Killed(output) = event {
                            self.record_stopped_output(id, output);
                            break;
                        }
                    }
                    return;
                }
                event = process.next_event() => match event {
                    Some(EngineEvent::Progress(percent)) => self.record_progress(id, percent),
                    Some(EngineEvent::Killed(output)) => {
                        self.record_stopped_output(id, output);
                        return;
                    }
                    Some(EngineEvent::Exited(output)) => {
                        let outcome = settle(&request, output);
                        self.finish(id, outcome);
                        return;
                    }
                    None => {
                        let error = ScanError::EngineFailure {
                            code: None,
                            detail: "engine output ended without an exit status".into(),
                        };
                        self.finish(id, Outcome::Failed { error, raw_output: String::new() });
                        return;
                    }
                },
            }
        }
    }

    fn mark_running(&self, id: JobId) -> bool {
        let Some(mut record) = self.jobs.get_mut(&id) else {
            return false;
        };
        if !record.job.state.can_transition_to(JobState::Running) {
            log::debug!("[registry] mark_running_skipped: id={} state={}", id, record.job.state);
            return false;
        }
        record.job.state = JobState::Running;
        record.job.started_at = Some(Utc::now());
        log::debug!("[registry] state_updated: id={} status=Running", id);
        self.events.publish(&Event::Started { job_id: id });
        true
    }

    fn record_progress(&self, id: JobId, percent: u8) {
        let Some(mut record) = self.jobs.get_mut(&id) else {
            return;
        };
        if record.job.state != JobState::Running || percent < record.job.progress {
            return;
        }
        record.job.progress = percent;
        log::trace!("[registry] progress: id={} percent={}", id, percent);
        self.events.publish(&Event::Progress { job_id: id, percent });
    }

    /// A stopped job keeps whatever the engine wrote before it was killed.
    /// No event is published; the job's terminal event has already gone out.
    fn record_stopped_output(&self, id: JobId, output: EngineOutput) {
        let Some(mut record) = self.jobs.get_mut(&id) else {
            return;
        };
        if record.job.state != JobState::Stopped || !record.job.raw_output.is_empty() {
            return;
        }
        log::debug!("[registry] stopped_output: id={} len={}", id, output.combined.len());
        record.job.raw_output = output.combined;
    }

    /// Apply a terminal transition: record history, analyze, then publish.
    fn finish(&self, id: JobId, outcome: Outcome) -> bool {
        {
            let Some(mut record) = self.jobs.get_mut(&id) else {
                return false;
            };
            let next = outcome.state();
            if !record.job.state.can_transition_to(next) {
                log::debug!(
                    "[registry] transition_ignored: id={} from={} to={}",
                    id,
                    record.job.state,
                    next
                );
                return false;
            }

            let record = &mut *record;
            let job = &mut record.job;
            job.state = next;
            job.ended_at = Some(Utc::now());

            let mut terminal_events = Vec::with_capacity(3);
            match outcome {
                Outcome::Completed { result, raw_output } => {
                    job.progress = 100;
                    job.raw_output = raw_output;
                    if let Some(report) = result.report() {
                        job.findings = analyzer::analyze(report);
                    }
                    terminal_events.push(Event::Result { job_id: id, result: result.clone() });
                    if !job.findings.is_empty() {
                        terminal_events.push(Event::Findings { job_id: id, findings: job.findings.clone() });
                    }
                    job.result = Some(result);
                    terminal_events.push(Event::Complete { job_id: id, duration_seconds: job.duration_seconds() });
                }
                Outcome::Failed { error, raw_output } => {
                    let message = error.to_string();
                    job.raw_output = raw_output;
                    job.error = Some(message.clone());
                    terminal_events.push(Event::Error { job_id: id, message });
                }
                Outcome::Stopped => {
                    record.cancel.cancel();
                    terminal_events.push(Event::Stopped { job_id: id });
                }
            }

            let job = &record.job;
            self.history.append(HistoryEntry::from_job(job));
            for event in &terminal_events {
                self.events.publish(event);
            }

            match job.state {
                JobState::Failed => log::error!(
                    "[registry] state_updated: id={} status=Failed duration={:.3}s error={}",
                    id,
                    job.duration_seconds(),
                    job.error.as_deref().unwrap_or_default()
                ),
                _ => log::info!(
                    "[registry] state_updated: id={} status={} duration={:.3}s findings={}",
                    id,
                    job.state,
                    job.duration_seconds(),
                    job.findings.len()
                ),
            }
        }

        self.retire(id);
        true
    }

    /// Forget the oldest terminal jobs beyond the retention limit.
    fn retire(&self, id: JobId) {
        let evicted: Vec<JobId> = {
            let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
            finished.push_back(id);
            let excess = finished.len().saturating_sub(self.retention);
            finished.drain(..excess).collect()
        };
        for old in evicted {
            self.jobs.remove(&old);
            log::trace!("[registry] job_evicted: id={}", old);
        }
    }
}

fn settle(request: &ScanRequest, output: EngineOutput) -> Outcome {
    if !output.success() {
        let error = ScanError::EngineFailure {
            code: output.exit_code,
            detail: output.failure_detail(),
        };
        return Outcome::Failed { error, raw_output: output.combined };
    }
    match decode::interpret(request.format, &output.stdout) {
        Ok(result) => Outcome::Completed { result, raw_output: output.combined },
        Err(error) => Outcome::Failed { error, raw_output: output.combined },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(engine: EngineCommand, history: usize, retention: usize) -> (Arc<JobRegistry>, Arc<Broadcaster>) {
        let events = Arc::new(Broadcaster::default());
        let registry = Arc::new(JobRegistry::new(
            engine,
            Arc::new(HistoryStore::new(history)),
            Arc::clone(&events),
            Duration::from_secs(1),
            retention,
        ));
        (registry, events)
    }

    fn request() -> ScanRequest {
        ScanRequest::new(vec!["10.0.0.5".into()], "22")
    }

    #[test]
    fn test_settle_engine_failure() {
        let output = EngineOutput {
            exit_code: Some(2),
            stdout: String::new(),
            stderr: "unreachable\n".into(),
            combined: "unreachable\n".into(),
        };
        match settle(&request(), output) {
            Outcome::Failed { error, raw_output } => {
                assert_eq!(error, ScanError::EngineFailure { code: Some(2), detail: "unreachable".into() });
                assert_eq!(raw_output, "unreachable\n");
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn test_settle_decode_failure_keeps_raw() {
        let output = EngineOutput {
            exit_code: Some(0),
            stdout: "garbage".into(),
            stderr: String::new(),
            combined: "garbage".into(),
        };
        match settle(&request(), output) {
            Outcome::Failed { error: ScanError::DecodeFailure(_), raw_output } => assert_eq!(raw_output, "garbage"),
            _ => panic!("expected decode failure"),
        }
    }

    #[test]
    fn test_settle_text_format() {
        let output = EngineOutput {
            exit_code: Some(0),
            stdout: "22/tcp open".into(),
            stderr: String::new(),
            combined: "22/tcp open".into(),
        };
        let req = request().with_format(crate::types::OutputFormat::Text);
        assert!(matches!(settle(&req, output), Outcome::Completed { result: ScanOutcome::Raw(_), .. }));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_request_without_side_effects() {
        let (registry, events) = registry(EngineCommand::new("true"), 10, 10);
        let mut sub = events.subscribe();

        let err = registry.submit(ScanRequest::new(vec![], "22")).unwrap_err();
        assert!(matches!(err, ScanError::InvalidRequest(_)));
        assert!(registry.active().is_empty());
        assert!(registry.list(10).is_empty());
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_stop_unknown_job() {
        let (registry, _) = registry(EngineCommand::new("true"), 10, 10);
        assert!(!registry.stop(&JobId::new()));
        assert!(registry.get(&JobId::new()).is_none());
    }

    async fn wait_terminal(sub: &mut crate::broadcast::Subscription, id: JobId) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = sub.recv().await {
                if event.job_id() == id && event.is_terminal() {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stop_pending_job_is_refused() {
        let (registry, events) = registry(EngineCommand::new("/nonexistent/engine"), 10, 10);
        let mut sub = events.subscribe();
        let id = registry.submit(request()).unwrap();

        // The background task has not run yet on the current-thread runtime.
        assert!(!registry.stop(&id));
        let job = registry.get(&id).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.ended_at.is_none());
        assert_eq!(sub.try_recv(), None);

        // The job carries on and fails on its own.
        wait_terminal(&mut sub, id).await;
        assert_eq!(registry.get(&id).unwrap().state, JobState::Failed);
        assert!(!registry.stop(&id));
        assert_eq!(registry.list(10).len(), 1);
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest_terminal_jobs() {
        let (registry, events) = registry(EngineCommand::new("/nonexistent/engine"), 10, 2);
        let mut sub = events.subscribe();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = registry.submit(request()).unwrap();
            wait_terminal(&mut sub, id).await;
            ids.push(id);
        }

        assert!(registry.get(&ids[0]).is_none());
        assert!(registry.get(&ids[1]).is_some());
        assert!(registry.get(&ids[2]).is_some());
        assert_eq!(registry.list(10).len(), 3);
    }
}
