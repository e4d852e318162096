use super::RunEvent;
use crate::error::{Result, SyncError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error};

static TO_CHECK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"to-check=(\d+)/(\d+)").expect("valid to-check pattern")
});

/// Shared cancel/finished flags for one run. Clones observe the same run.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl RunControl {
    /// Request cooperative cancellation. Takes effect at the next line
    /// boundary; the child is then killed and reaped.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True once the child has been reaped and the terminal event sent.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// The caller's side of one run: the ordered event stream plus control.
/// Dropping the handle detaches the run; it does not cancel it.
#[derive(Debug)]
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<RunEvent>,
    control: RunControl,
}

impl RunHandle {
    /// Next event in order; `None` once the terminal event has been consumed.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Consume the handle as a `Stream` of events.
    pub fn into_stream(self) -> UnboundedReceiverStream<RunEvent> {
        UnboundedReceiverStream::new(self.events)
    }
}

/// Start one external process run from a full argument vector
/// (`args[0]` is the program).
///
/// Fails with `ExecutableNotFound` when the program cannot be located and
/// with `Spawn` when process creation itself fails. Everything after a
/// successful spawn is reported through the returned handle's events,
/// ending in exactly one `Failed` or `Completed`.
pub fn start(args: &[String]) -> Result<RunHandle> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| SyncError::InvalidSettings("empty command".into()))?;
    let program_path = locate_program(program)?;

    let mut child = Command::new(&program_path)
        .args(rest)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SyncError::Spawn(e.to_string()))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SyncError::Spawn("stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SyncError::Spawn("stderr not captured".into()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let control = RunControl::default();

    tokio::spawn(run_loop(child, stdout, stderr, tx, control.clone()));

    Ok(RunHandle {
        events: rx,
        control,
    })
}

/// First line of `rsync --version`, used at startup to log availability.
pub async fn rsync_version() -> Result<String> {
    version_line("rsync").await
}

async fn version_line(program: &str) -> Result<String> {
    locate_program(program)?;
    let output = Command::new(program)
        .arg("--version")
        .output()
        .await
        .map_err(|e| SyncError::Spawn(e.to_string()))?;
    if !output.status.success() {
        return Err(SyncError::NonZeroExit(exit_code(&output.status)));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

fn locate_program(name: &str) -> Result<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        // Explicit path: no PATH search, just an existence check
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        return Err(SyncError::ExecutableNotFound(name.to_string()));
    }
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let full = dir.join(name);
        if full.is_file() {
            return Ok(full);
        }
    }
    Err(SyncError::ExecutableNotFound(name.to_string()))
}

async fn run_loop(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::UnboundedSender<RunEvent>,
    control: RunControl,
) {
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut tracker = ProgressTracker::default();
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut read_error = None;

    while !(stdout_done && stderr_done) {
        let line = tokio::select! {
            result = stdout_lines.next_line(), if !stdout_done => match result {
                Ok(Some(line)) => Some(line),
                Ok(None) => {
                    stdout_done = true;
                    None
                }
                Err(e) => {
                    error!("Error reading stdout: {}", e);
                    read_error = Some(format!("failed to read output: {e}"));
                    break;
                }
            },
            result = stderr_lines.next_line(), if !stderr_done => match result {
                Ok(Some(line)) => Some(line),
                Ok(None) => {
                    stderr_done = true;
                    None
                }
                Err(e) => {
                    error!("Error reading stderr: {}", e);
                    read_error = Some(format!("failed to read output: {e}"));
                    break;
                }
            },
        };

        // Cancellation takes effect at line boundaries; a line read after
        // the flag flipped is dropped, not forwarded
        if control.is_cancelled() {
            break;
        }

        let line = match line {
            Some(line) => line,
            None => continue,
        };

        debug!("rsync output: {}", line);
        let percent = tracker.update(&line);
        let _ = tx.send(RunEvent::OutputLine(line));
        if let Some(percent) = percent {
            let _ = tx.send(RunEvent::Progress(percent));
        }
    }

    // After an early break the child is still writing to pipes nobody
    // reads; kill it so the wait below can return
    if control.is_cancelled() || read_error.is_some() {
        let _ = child.start_kill();
    }

    // Always reap the child so no zombie is left behind
    let status = child.wait().await;
    control.mark_finished();

    let terminal = if let Some(message) = read_error {
        RunEvent::Failed(message)
    } else {
        match status {
            Ok(status) => {
                let code = exit_code(&status);
                if code == 0 {
                    RunEvent::Completed(true)
                } else {
                    RunEvent::Failed(SyncError::NonZeroExit(code).to_string())
                }
            }
            Err(e) => RunEvent::Failed(format!("failed to wait for process: {e}")),
        }
    };
    let _ = tx.send(terminal);
}

/// Exit code with death-by-signal reported as the negated signal number.
fn exit_code(status: &ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    status.code().unwrap_or(-1)
}

/// Derives a 0..=100 percentage from rsync's `to-check=remaining/total`
/// fragments. The first sighting fixes the denominator for the whole run.
#[derive(Debug, Default)]
struct ProgressTracker {
    total: Option<i64>,
}

impl ProgressTracker {
    /// `Some(percent)` when the line carries a usable fragment, `None`
    /// otherwise. Malformed fragments and a zero denominator are swallowed.
    fn update(&mut self, line: &str) -> Option<u8> {
        let caps = TO_CHECK.captures(line)?;
        let remaining: i64 = caps.get(1)?.as_str().parse().ok()?;
        let total_now: i64 = caps.get(2)?.as_str().parse().ok()?;
        let denominator = *self.total.get_or_insert(total_now);
        if denominator <= 0 {
            return None;
        }
        let percent = (total_now - remaining) * 100 / denominator;
        Some(percent.clamp(0, 100) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    async fn collect_events(mut handle: RunHandle) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn progress_fixes_denominator_at_first_sighting() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.update("to-check=80/100)"), Some(20));
        assert_eq!(tracker.update("to-check=40/100)"), Some(60));
        assert_eq!(tracker.update("to-check=0/100)"), Some(100));
    }

    #[test]
    fn progress_uses_first_total_when_counts_grow() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.update("to-check=80/100)"), Some(20));
        // rsync revised the total upward; the denominator stays at 100
        assert_eq!(tracker.update("to-check=90/120)"), Some(30));
        assert_eq!(tracker.update("to-check=0/250)"), Some(100));
    }

    #[test]
    fn progress_swallows_malformed_fragments() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.update("plain output line"), None);
        assert_eq!(tracker.update("to-check=abc/def)"), None);
        assert_eq!(tracker.update("to-check=/100)"), None);
        // Nothing above fixed a denominator, so a good line still works
        assert_eq!(tracker.update("to-check=50/100)"), Some(50));
    }

    #[test]
    fn progress_swallows_zero_denominator() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.update("to-check=0/0)"), None);
        // Denominator was fixed at zero for the rest of the run
        assert_eq!(tracker.update("to-check=5/10)"), None);
    }

    #[cfg(unix)]
    #[test]
    fn locate_program_searches_path() {
        assert!(locate_program("sh").is_ok());
        assert!(locate_program("no-such-binary-here").is_err());
    }

    #[tokio::test]
    async fn missing_executable_is_rejected() {
        let err = start(&argv(&["definitely-not-a-real-program-xyz"])).unwrap_err();
        assert!(matches!(err, SyncError::ExecutableNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn version_line_requires_clean_exit() {
        let err = version_line("false").await.unwrap_err();
        assert!(matches!(err, SyncError::NonZeroExit(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_exit_emits_single_completed() {
        let handle = start(&argv(&["sh", "-c", "echo one; echo two"])).unwrap();
        let events = collect_events(handle).await;
        let lines = events
            .iter()
            .filter(|e| matches!(e, RunEvent::OutputLine(_)))
            .count();
        assert_eq!(lines, 2);
        let terminals: Vec<&RunEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals, vec![&RunEvent::Completed(true)]);
        assert!(events.last().is_some_and(RunEvent::is_terminal));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_emits_single_failed() {
        let handle = start(&argv(&["sh", "-c", "exit 2"])).unwrap();
        let events = collect_events(handle).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            RunEvent::Failed(message) => assert_eq!(message, "Rsync exited with code 2"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_output_emits_single_failed() {
        // Invalid UTF-8 fails the line reader while the child keeps writing;
        // the run must still end with its one terminal event
        let script = "printf '\\377\\376 bad\\n'; seq 1 200000";
        let handle = start(&argv(&["sh", "-c", script])).unwrap();
        let events = tokio::time::timeout(Duration::from_secs(5), collect_events(handle))
            .await
            .expect("reader failure should still end the run");
        let terminals: Vec<&RunEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1);
        assert!(matches!(terminals[0], RunEvent::Failed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_lines_are_forwarded() {
        let handle = start(&argv(&["sh", "-c", "echo out; echo err >&2"])).unwrap();
        let events = collect_events(handle).await;
        let lines: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::OutputLine(line) => Some(line.as_str()),
                _ => None,
            })
            .collect();
        assert!(lines.contains(&"out"));
        assert!(lines.contains(&"err"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn progress_events_follow_to_check_lines() {
        let script = "echo 'to-check=80/100'; echo 'to-check=0/100'";
        let handle = start(&argv(&["sh", "-c", script])).unwrap();
        let events = collect_events(handle).await;
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![20, 100]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_still_yields_one_terminal_event() {
        let mut handle =
            start(&argv(&["sh", "-c", "while true; do echo tick; sleep 0.05; done"])).unwrap();
        let control = handle.control();

        let first = handle.next_event().await;
        assert!(matches!(first, Some(RunEvent::OutputLine(_))));
        control.cancel();

        let mut terminals = 0;
        while let Some(event) = handle.next_event().await {
            if event.is_terminal() {
                terminals += 1;
            }
        }
        assert_eq!(terminals, 1);
        assert!(control.is_finished());
    }
}
