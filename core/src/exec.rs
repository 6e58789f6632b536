//! Terminal runner. One request moves through
//! `Received -> Denied | Spawned -> {Exited | TimedOut | SpawnFailed}`;
//! every path resolves to a [`TerminalRunResult`], never an error.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;

use crate::config::SandboxConfig;
use crate::output_cap::OutputCap;
use crate::policy;
use crate::protocol::TerminalOutcome;
use crate::protocol::TerminalRunRequest;
use crate::protocol::TerminalRunResult;

/// How long a timed-out process gets between the polite terminate signal
/// and the forced kill.
const KILL_GRACE: Duration = Duration::from_millis(2_000);

/// Run one terminal request confined to `workspace_root`.
///
/// Policy checks run before anything spawns: the denylist, the
/// missing-root rule (this subsystem never defaults to an ambient
/// directory) and the network default-deny. The child gets exactly the
/// request's env map (nothing inherited), argv as discrete tokens (no
/// shell), and `min(requested, hard ceiling)` of wall time.
pub async fn run_terminal(
    request: TerminalRunRequest,
    workspace_root: Option<&Path>,
    config: &SandboxConfig,
) -> TerminalRunResult {
    if let Some(reason) = policy::deny_reason(&request.command) {
        tracing::warn!("denied command: {reason}");
        return TerminalRunResult::denied(reason);
    }
    let Some(root) = workspace_root else {
        return TerminalRunResult::denied("no workspace root is configured for this session");
    };
    if request.network.enabled {
        return TerminalRunResult::denied(
            "network access is not available; re-run with network disabled",
        );
    }

    let timeout = Duration::from_millis(config.effective_timeout_ms(request.timeout_ms));
    let max_output = request.max_output_bytes.unwrap_or(config.max_output_bytes);

    let start = Instant::now();
    // First token is the executable; the denylist already rejected empty
    // commands.
    let (program, args) = match request.command.split_first() {
        Some(split) => split,
        None => return TerminalRunResult::denied("empty command"),
    };

    let child = Command::new(program)
        .args(args)
        .current_dir(root)
        .env_clear()
        .envs(&request.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(err) => {
            tracing::warn!("failed to spawn {program}: {err}");
            return TerminalRunResult {
                stdout: String::new(),
                stderr: format!("failed to spawn '{program}': {err}"),
                outcome: TerminalOutcome::Exit { code: -1 },
                duration_ms: start.elapsed().as_millis() as u64,
                truncated: false,
            };
        }
    };

    let (outcome, stdout, stderr) = supervise(child, timeout, max_output).await;
    let truncated = stdout.truncated() || stderr.truncated();
    TerminalRunResult {
        stdout: stdout.into_string(),
        stderr: stderr.into_string(),
        outcome,
        duration_ms: start.elapsed().as_millis() as u64,
        truncated,
    }
}

/// Drive the child to one of its three mutually exclusive terminations:
/// normal exit, timeout-then-kill, or wait failure. Captured output up to
/// that point is always returned.
async fn supervise(
    mut child: Child,
    timeout: Duration,
    max_output: usize,
) -> (TerminalOutcome, OutputCap, OutputCap) {
    // Piped above, so `take()` returns Some.
    let stdout_handle = child
        .stdout
        .take()
        .map(|r| tokio::spawn(read_capped(BufReader::new(r), max_output)));
    let stderr_handle = child
        .stderr
        .take()
        .map(|r| tokio::spawn(read_capped(BufReader::new(r), max_output)));

    let outcome = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => TerminalOutcome::Exit {
            code: status.code().unwrap_or(-1),
        },
        Ok(Err(err)) => {
            // wait() failing after a successful spawn is an execution
            // fault, reported like a spawn error rather than propagated.
            tracing::error!("waiting on child failed: {err}");
            TerminalOutcome::Exit { code: -1 }
        }
        Err(_elapsed) => {
            terminate_then_kill(&mut child).await;
            TerminalOutcome::Timeout
        }
    };

    let stdout = join_capture(stdout_handle, max_output).await;
    let stderr = join_capture(stderr_handle, max_output).await;
    (outcome, stdout, stderr)
}

async fn join_capture(
    handle: Option<tokio::task::JoinHandle<OutputCap>>,
    max_output: usize,
) -> OutputCap {
    match handle {
        Some(handle) => match handle.await {
            Ok(cap) => cap,
            Err(err) => {
                tracing::error!("output capture task failed: {err}");
                OutputCap::new(max_output)
            }
        },
        None => OutputCap::new(max_output),
    }
}

/// Cooperative cancellation: a polite terminate first, then a forced kill
/// if the process is still alive after the grace window.
async fn terminate_then_kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: sending SIGTERM to the child we spawned.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    if let Err(err) = child.start_kill() {
        tracing::warn!("failed to kill timed-out child: {err}");
    }
    let _ = child.wait().await;
}

/// Read `reader` to EOF, retaining at most `max_output` bytes. Draining
/// continues after the cap so the child never blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    max_output: usize,
) -> OutputCap {
    let mut cap = OutputCap::new(max_output);
    let mut tmp = [0u8; 8192];
    loop {
        match reader.read(&mut tmp).await {
            Ok(0) | Err(_) => break,
            Ok(n) => cap.push(&tmp[..n]),
        }
    }
    cap
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::protocol::NetworkPolicy;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn request(command: &[&str]) -> TerminalRunRequest {
        TerminalRunRequest {
            command: command.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            timeout_ms: None,
            max_output_bytes: None,
            network: NetworkPolicy::default(),
        }
    }

    #[tokio::test]
    async fn echo_exits_zero_with_stdout() {
        let dir = tempdir().unwrap();
        let mut req = request(&["echo", "hello"]);
        req.timeout_ms = Some(5_000);
        let result = run_terminal(req, Some(dir.path()), &SandboxConfig::default()).await;
        assert_eq!(result.outcome, TerminalOutcome::Exit { code: 0 });
        assert_eq!(result.stdout, "hello\n");
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn denied_command_never_spawns() {
        let dir = tempdir().unwrap();
        let result = run_terminal(
            request(&["cat", "/etc/shadow"]),
            Some(dir.path()),
            &SandboxConfig::default(),
        )
        .await;
        assert!(matches!(result.outcome, TerminalOutcome::Denied { .. }));
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn missing_root_is_denied() {
        let result = run_terminal(request(&["echo", "hi"]), None, &SandboxConfig::default()).await;
        assert!(matches!(result.outcome, TerminalOutcome::Denied { .. }));
    }

    #[tokio::test]
    async fn network_enabled_is_denied() {
        let dir = tempdir().unwrap();
        let mut req = request(&["echo", "hi"]);
        req.network = NetworkPolicy {
            enabled: true,
            allowed_domains: vec!["example.com".to_string()],
        };
        let result = run_terminal(req, Some(dir.path()), &SandboxConfig::default()).await;
        assert!(matches!(result.outcome, TerminalOutcome::Denied { .. }));
    }

    #[tokio::test]
    async fn spawn_failure_is_captured_not_thrown() {
        let dir = tempdir().unwrap();
        let result = run_terminal(
            request(&["definitely-not-a-real-binary-3f9c"]),
            Some(dir.path()),
            &SandboxConfig::default(),
        )
        .await;
        assert_eq!(result.outcome, TerminalOutcome::Exit { code: -1 });
        assert!(result.stderr.contains("failed to spawn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sleeping_child_times_out_and_returns_partial_output() {
        let dir = tempdir().unwrap();
        let mut req = request(&["sleep", "30"]);
        req.timeout_ms = Some(250);
        let start = std::time::Instant::now();
        let result = run_terminal(req, Some(dir.path()), &SandboxConfig::default()).await;
        assert_eq!(result.outcome, TerminalOutcome::Timeout);
        // TERM is enough for sleep; the grace window should not be burned.
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn environment_is_not_inherited() {
        let dir = tempdir().unwrap();
        // SAFETY: test-only env mutation before the child spawns.
        unsafe { std::env::set_var("GUARDRAIL_LEAK_CHECK", "leaked") };
        let mut req = request(&["env"]);
        req.env.insert("ONLY_THIS".to_string(), "1".to_string());
        let result = run_terminal(req, Some(dir.path()), &SandboxConfig::default()).await;
        assert_eq!(result.outcome, TerminalOutcome::Exit { code: 0 });
        assert!(!result.stdout.contains("GUARDRAIL_LEAK_CHECK"));
        assert!(result.stdout.contains("ONLY_THIS=1"));
    }

    #[tokio::test]
    async fn output_is_truncated_at_the_cap() {
        let dir = tempdir().unwrap();
        let mut req = request(&["yes"]);
        req.max_output_bytes = Some(1024);
        req.timeout_ms = Some(500);
        let result = run_terminal(req, Some(dir.path()), &SandboxConfig::default()).await;
        assert!(result.truncated);
        assert!(result.stdout.len() <= 1024 + "\n[output truncated]".len());
    }
}
