//! Method lookup delegated to an external resolver program.

use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

use crate::data::{MethodLocator, MethodRange};
use crate::tools::process::run_with_timeout;

/// Runs `argv` with `{file}` and `{line}` substituted and reads `<start> <end>` from stdout.
///
/// Any failure, timeout or unparsable output resolves to no method.
pub struct CommandLocator {
    argv: Vec<String>,
    timeout: Duration,
}

impl CommandLocator {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    fn command_line(&self, file_path: &Path, line: usize) -> Vec<String> {
        let file = file_path.display().to_string();
        let line = line.to_string();
        self.argv
            .iter()
            .map(|arg| arg.replace("{file}", &file).replace("{line}", &line))
            .collect()
    }
}

/// Reads the first two integers on the last non-empty output line.
pub fn parse_range(output: &str) -> Option<MethodRange> {
    let last = output.lines().rev().find(|l| !l.trim().is_empty())?;
    let mut numbers = last
        .split(|c: char| c.is_whitespace() || c == ',' || c == '-')
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>());
    let start_line = numbers.next()?.ok()?;
    let end_line = numbers.next()?.ok()?;
    (start_line >= 1 && start_line <= end_line).then_some(MethodRange { start_line, end_line })
}

impl MethodLocator for CommandLocator {
    fn locate(&self, file_path: &Path, line: usize) -> Option<MethodRange> {
        let argv = self.command_line(file_path, line);
        let (program, args) = argv.split_first()?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        match run_with_timeout(&mut cmd, program, self.timeout) {
            Ok(output) if output.status.success() => {
                let range = parse_range(&output.stdout);
                debug!("{} resolved {}:{} to {:?}", program, file_path.display(), line, range);
                range
            }
            Ok(output) => {
                debug!("{} found no method for {}:{}: {}", program, file_path.display(), line, output.combined());
                None
            }
            Err(e) => {
                warn!("Method resolver failed for {}:{}: {}", file_path.display(), line, e);
                None
            }
        }
    }
}
