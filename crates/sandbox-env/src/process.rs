//! Child process execution with a timeout.

use crate::error::Error;
use crate::Result;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Raw output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Run `command` to completion, killing it if it outlives `timeout`.
///
/// Stdin is closed and both output streams are captured. A process killed by
/// a signal reports exit code -1.
pub async fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<ProcessOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn()?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(-1);
            debug!(
                exit_code,
                stdout_len = output.stdout.len(),
                stderr_len = output.stderr.len(),
                "process finished"
            );
            Ok(ProcessOutput {
                exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "process timed out");
            Err(Error::Timeout(timeout))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo out; echo err >&2; exit 3");
        let output = run_with_timeout(command, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout_lossy(), "out\n");
        assert_eq!(output.stderr_lossy(), "err\n");
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("sleep 5");
        let err = run_with_timeout(command, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
