use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::engine::progress::ProgressTracker;
use crate::error::ScanError;

const READ_CHUNK_SIZE: usize = 4096;
const CHUNK_CHANNEL_DEPTH: usize = 64;
const EVENT_CHANNEL_DEPTH: usize = 64;

/// How to launch the engine: the program plus any fixed leading arguments
/// (for example an interpreter script) placed before the request arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: String,
    pub leading_args: Vec<String>,
}

impl EngineCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    pub fn with_leading_arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }
}

/// Everything the engine wrote, plus how it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Both streams interleaved in arrival order.
    pub combined: String,
}

impl EngineOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stderr followed by stdout, skipping whichever is blank.
    pub fn failure_detail(&self) -> String {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Progress(u8),
    Exited(EngineOutput),
    /// The process was terminated; carries the output read before the kill.
    Killed(EngineOutput),
}

/// Handle to one running engine process.
///
/// Events arrive in order: zero or more `Progress`, then exactly one of
/// `Exited` or `Killed`.
pub struct EngineProcess {
    pid: Option<u32>,
    events: mpsc::Receiver<EngineEvent>,
    kill: CancellationToken,
}

impl EngineProcess {
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.events.recv().await
    }

    /// Ask the supervisor to kill the process. Returns immediately; the
    /// supervisor reaps the process in the background and then reports
    /// `Killed`.
    pub fn terminate(&self) {
        log::debug!("[engine::runner] terminate_requested: pid={:?}", self.pid);
        self.kill.cancel();
    }
}

/// Spawn the engine with `args` appended to the command's leading arguments.
///
/// Fails only when the process cannot be started at all. Must be called from
/// within a tokio runtime.
pub fn spawn(command: &EngineCommand, args: &[String], grace: Duration) -> Result<EngineProcess, ScanError> {
    log::debug!(
        "[engine::runner] spawn: program={} leading_args={:?} args={:?}",
        command.program,
        command.leading_args,
        args
    );

    let mut child = Command::new(&command.program)
        .args(&command.leading_args)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            log::error!("[engine::runner] spawn_failed: program={} error={}", command.program, e);
            ScanError::SpawnFailure(format!("{}: {}", command.program, e))
        })?;

    let pid = child.id();
    let (tx, events) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    let kill = CancellationToken::new();

    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_DEPTH);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(read_stream(stdout, StreamKind::Stdout, chunk_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(read_stream(stderr, StreamKind::Stderr, chunk_tx));
    }

    tokio::spawn(supervise(child, chunk_rx, tx, kill.clone(), grace));

    log::debug!("[engine::runner] spawned: program={} pid={:?}", command.program, pid);
    Ok(EngineProcess { pid, events, kill })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

struct Chunk {
    kind: StreamKind,
    text: String,
}

async fn read_stream<R>(mut reader: R, kind: StreamKind, tx: mpsc::Sender<Chunk>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let text = take_complete_utf8(&mut pending);
                if !text.is_empty() && tx.send(Chunk { kind, text }).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                log::warn!("[engine::runner] read_failed: stream={:?} error={}", kind, e);
                break;
            }
        }
    }

    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        let _ = tx.send(Chunk { kind, text }).await;
    }
}

/// Drain the decodable prefix of `pending`, leaving a trailing incomplete
/// sequence for the next read. Invalid sequences become U+FFFD.
fn take_complete_utf8(pending: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(valid) => {
                text.push_str(valid);
                pending.clear();
                return text;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&pending[..valid_up_to]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid_up_to + len);
                    }
                    None => {
                        pending.drain(..valid_up_to);
                        return text;
                    }
                }
            }
        }
    }
}

#[derive(Default)]
struct OutputBuffers {
    stdout: String,
    stderr: String,
    combined: String,
}

impl OutputBuffers {
    fn push(&mut self, chunk: &Chunk) {
        match chunk.kind {
            StreamKind::Stdout => self.stdout.push_str(&chunk.text),
            StreamKind::Stderr => self.stderr.push_str(&chunk.text),
        }
        self.combined.push_str(&chunk.text);
    }
}

async fn supervise(
    mut child: Child,
    mut chunks: mpsc::Receiver<Chunk>,
    tx: mpsc::Sender<EngineEvent>,
    kill: CancellationToken,
    grace: Duration,
) {
    let started = Instant::now();
    let pid = child.id();
    let mut buffers = OutputBuffers::default();
    let mut tracker = ProgressTracker::new();
    let mut streams_open = true;

    let status = loop {
        tokio::select! {
            chunk = chunks.recv(), if streams_open => match chunk {
                Some(chunk) => {
                    if let Some(percent) = tracker.observe(&chunk.text) {
                        let _ = tx.send(EngineEvent::Progress(percent)).await;
                    }
                    buffers.push(&chunk);
                }
                None => streams_open = false,
            },
            _ = kill.cancelled() => {
                reap_killed(&mut child, pid, grace).await;
                // Readers may still be blocked on pipes held by grandchildren,
                // so only take what is already queued.
                while let Ok(chunk) = chunks.try_recv() {
                    buffers.push(&chunk);
                }
                let output = EngineOutput {
                    exit_code: None,
                    stdout: buffers.stdout,
                    stderr: buffers.stderr,
                    combined: buffers.combined,
                };
                let _ = tx.send(EngineEvent::Killed(output)).await;
                return;
            }
            status = child.wait() => break status,
        }
    };

    // The process is gone; collect whatever is still buffered in the pipes.
    while let Some(chunk) = chunks.recv().await {
        if let Some(percent) = tracker.observe(&chunk.text) {
            let _ = tx.send(EngineEvent::Progress(percent)).await;
        }
        buffers.push(&chunk);
    }

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            log::error!("[engine::runner] wait_failed: pid={:?} error={}", pid, e);
            None
        }
    };

    log::debug!(
        "[engine::runner] exited: pid={:?} code={:?} duration={}ms progress={:?} stdout_len={} stderr_len={}",
        pid,
        exit_code,
        started.elapsed().as_millis(),
        tracker.last(),
        buffers.stdout.len(),
        buffers.stderr.len()
    );

    let output = EngineOutput {
        exit_code,
        stdout: buffers.stdout,
        stderr: buffers.stderr,
        combined: buffers.combined,
    };
    let _ = tx.send(EngineEvent::Exited(output)).await;
}

async fn reap_killed(child: &mut Child, pid: Option<u32>, grace: Duration) {
    if let Err(e) = child.start_kill() {
        log::warn!("[engine::runner] kill_failed: pid={:?} error={}", pid, e);
    }
    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => log::debug!("[engine::runner] killed: pid={:?} status={}", pid, status),
        Ok(Err(e)) => log::warn!("[engine::runner] reap_failed: pid={:?} error={}", pid, e),
        Err(_) => log::warn!(
            "[engine::runner] still_running_after_kill: pid={:?} grace={}ms",
            pid,
            grace.as_millis()
        ),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(2);

    fn sh(script: &str) -> (EngineCommand, Vec<String>) {
        (EngineCommand::new("sh"), vec!["-c".to_string(), script.to_string()])
    }

    async fn drain(mut process: EngineProcess) -> (Vec<u8>, EngineOutput) {
        let mut progress = Vec::new();
        loop {
            match timeout(Duration::from_secs(10), process.next_event()).await {
                Ok(Some(EngineEvent::Progress(p))) => progress.push(p),
                Ok(Some(EngineEvent::Exited(output))) => return (progress, output),
                Ok(Some(EngineEvent::Killed(_))) => panic!("engine was killed"),
                Ok(None) => panic!("event stream ended without exit"),
                Err(_) => panic!("timed out waiting for engine"),
            }
        }
    }

    #[tokio::test]
    async fn test_spawn_collects_output_and_exit_code() {
        let (cmd, args) = sh("echo hello; echo oops >&2; exit 3");
        let process = spawn(&cmd, &args, GRACE).unwrap();
        assert!(process.id().is_some());

        let (_, output) = drain(process).await;
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(output.combined.contains("hello") && output.combined.contains("oops"));
        assert_eq!(output.failure_detail(), "oops\nhello");
    }

    #[tokio::test]
    async fn test_failure_detail_with_only_stdout() {
        let (cmd, args) = sh("echo only-stdout; exit 1");
        let (_, output) = drain(spawn(&cmd, &args, GRACE).unwrap()).await;
        assert_eq!(output.failure_detail(), "only-stdout");
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let (cmd, args) = sh("echo 10%; sleep 0.05; echo 5%; sleep 0.05; echo 40% >&2; sleep 0.05; echo 40%; exit 0");
        let (progress, output) = drain(spawn(&cmd, &args, GRACE).unwrap()).await;
        assert!(output.success());
        assert_eq!(progress, vec![10, 40]);
    }

    #[tokio::test]
    async fn test_no_progress_markers() {
        let (cmd, args) = sh("echo scanning; echo done");
        let (progress, output) = drain(spawn(&cmd, &args, GRACE).unwrap()).await;
        assert!(progress.is_empty());
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_leading_args_come_first() {
        let cmd = EngineCommand::new("sh").with_leading_arg("-c").with_leading_arg("echo \"$0 $1\"");
        let args = vec!["first".to_string(), "second".to_string()];
        let (_, output) = drain(spawn(&cmd, &args, GRACE).unwrap()).await;
        assert_eq!(output.stdout.trim(), "first second");
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let cmd = EngineCommand::new("/nonexistent/scan-engine");
        let err = spawn(&cmd, &[], GRACE).err().unwrap();
        assert!(matches!(err, ScanError::SpawnFailure(_)));
    }

    #[tokio::test]
    async fn test_terminate_does_not_block() {
        let (cmd, args) = sh("echo 1%; exec sleep 30");
        let mut process = spawn(&cmd, &args, GRACE).unwrap();
        assert_eq!(
            timeout(Duration::from_secs(5), process.next_event()).await.unwrap(),
            Some(EngineEvent::Progress(1))
        );

        let started = Instant::now();
        process.terminate();
        assert!(started.elapsed() < Duration::from_millis(100));

        match timeout(Duration::from_secs(5), process.next_event()).await.unwrap() {
            Some(EngineEvent::Killed(output)) => {
                assert_eq!(output.exit_code, None);
                assert_eq!(output.stdout.trim(), "1%");
            }
            other => panic!("expected killed event, got {:?}", other),
        }
        assert_eq!(timeout(Duration::from_secs(5), process.next_event()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_reads() {
        // 4095 ASCII bytes put the two-byte 'é' across the read boundary.
        let (cmd, args) = sh("printf '%4095s' '' | tr ' ' x; printf '\\303\\251\\n'");
        let (_, output) = drain(spawn(&cmd, &args, GRACE).unwrap()).await;
        assert!(output.success());
        assert_eq!(output.stdout.chars().skip(4095).collect::<String>(), "é\n");
        assert_eq!(output.combined, output.stdout);
    }

    #[test]
    fn test_take_complete_utf8_keeps_partial_tail() {
        let mut pending = b"ab\xc3".to_vec();
        assert_eq!(take_complete_utf8(&mut pending), "ab");
        assert_eq!(pending, b"\xc3");

        pending.extend_from_slice(b"\xa9!");
        assert_eq!(take_complete_utf8(&mut pending), "é!");
        assert!(pending.is_empty());

        let mut invalid = b"a\xffb".to_vec();
        assert_eq!(take_complete_utf8(&mut invalid), "a\u{FFFD}b");
        assert!(invalid.is_empty());
    }
}
