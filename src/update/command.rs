//! `|command` sources: run through a shell, stdout becomes the body.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::{JobHandle, UpdateRequest, UpdateResult};

/// Default wall-clock timeout for command sources.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Environment variable overriding the command timeout, in seconds.
pub const CMD_TIMEOUT_ENV: &str = "EDDY_FEED_CMD_TIMEOUT";

fn exec_timeout() -> Duration {
    let secs = std::env::var(CMD_TIMEOUT_ENV)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Runs the command after the leading `|` through a shell.
///
/// Earlier implementations of this family of readers ran through popen()
/// and users depend on shell syntax working, so the command goes through
/// `/bin/sh -c`. stdout is captured, stderr discarded. Exit statuses map
/// to HTTP-style codes: success → 200, non-zero exit → 500, wall-clock
/// timeout → 504 after a SIGKILL. The child is always reaped before the
/// result is produced.
pub(crate) async fn process(request: &UpdateRequest, handle: &JobHandle) -> UpdateResult {
    let cmd = &request.source[1..];
    let mut result = UpdateResult {
        source: request.source.clone(),
        update_state: request.update_state.clone(),
        ..Default::default()
    };

    tracing::debug!(command = cmd, "executing command");

    let child = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!(command = cmd, error = %e, "could not spawn command");
            result.http_status = 404;
            result.error = Some(format!("could not open pipe \"{}\"", cmd));
            return result;
        }
    };

    // Drain stdout concurrently so the pipe never fills while we wait.
    let mut stdout = child.stdout.take();
    let reader = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(out) = stdout.as_mut() {
            let _ = out.read_to_end(&mut buf).await;
        }
        buf
    });

    enum Outcome {
        Exited(std::io::Result<std::process::ExitStatus>),
        TimedOut,
        Cancelled,
    }

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::time::sleep(exec_timeout()) => Outcome::TimedOut,
        _ = handle.kill.notified() => Outcome::Cancelled,
    };

    match outcome {
        Outcome::Exited(Ok(status)) => {
            let data = reader.await.unwrap_or_default();
            if status.success() {
                result.http_status = 200;
                result.data = data;
            } else {
                tracing::debug!(command = cmd, status = ?status.code(), "command exited with error");
                result.http_status = 500;
                result.error = Some(format!(
                    "\"{}\" exited with status {}",
                    cmd,
                    status.code().unwrap_or(-1)
                ));
            }
        }
        Outcome::Exited(Err(e)) => {
            reader.abort();
            result.http_status = 500;
            result.error = Some(e.to_string());
        }
        Outcome::TimedOut => {
            tracing::debug!(command = cmd, "command timed out, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
            reader.abort();
            result.http_status = 504;
            result.error = Some(format!("\"{}\" timed out", cmd));
        }
        Outcome::Cancelled => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            reader.abort();
            result.error = Some("request cancelled".to_string());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::{OwnerId, UpdateOptions, UpdateState};

    fn command_request(cmd: &str) -> UpdateRequest {
        let mut req = UpdateRequest::new(cmd, UpdateState::default(), UpdateOptions::default());
        req.allow_commands(true);
        req
    }

    fn test_handle() -> JobHandle {
        JobHandle::new(1, OwnerId::from("test"))
    }

    #[tokio::test]
    async fn test_command_stdout_captured() {
        let req = command_request("|echo HI");
        let result = process(&req, &test_handle()).await;
        assert_eq!(result.http_status, 200);
        assert_eq!(result.data, b"HI\n");
    }

    #[tokio::test]
    async fn test_command_failure_is_500() {
        let req = command_request("|false");
        let result = process(&req, &test_handle()).await;
        assert_eq!(result.http_status, 500);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_command_stderr_discarded() {
        let req = command_request("|echo OUT; echo ERR >&2");
        let result = process(&req, &test_handle()).await;
        assert_eq!(result.http_status, 200);
        assert_eq!(result.data, b"OUT\n");
    }
}
