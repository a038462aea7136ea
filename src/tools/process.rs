//! Timeout-bounded subprocess execution.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// stderr followed by stdout, for failure messages.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stderr, self.stdout).trim().to_string()
    }
}

/// Runs `cmd` to completion, killing it once `timeout` has elapsed.
///
/// Output pipes are drained on background threads so a chatty tool cannot
/// block on a full pipe while it is being waited on.
pub fn run_with_timeout(cmd: &mut Command, tool: &str, timeout: Duration) -> Result<ToolOutput> {
    debug!("Running {:?} (timeout {}s)", cmd, timeout.as_secs());
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| PipelineError::Spawn { tool: tool.to_string(), source })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PipelineError::ToolTimeout { tool: tool.to_string(), timeout });
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PipelineError::Io(e));
        }
    };

    Ok(ToolOutput {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_output_and_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let output = run_with_timeout(&mut cmd, "sh", Duration::from_secs(10)).unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.combined(), "err\nout");
    }

    #[test]
    fn test_timeout_kills_the_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_with_timeout(&mut cmd, "sleep", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, PipelineError::ToolTimeout { .. }));
    }

    #[test]
    fn test_missing_program_is_a_spawn_error() {
        let mut cmd = Command::new("/nonexistent/tool");
        let err = run_with_timeout(&mut cmd, "tool", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PipelineError::Spawn { .. }));
    }
}
