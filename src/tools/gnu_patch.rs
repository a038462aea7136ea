//! GNU `patch` driver.

use std::path::Path;
use std::process::Command;
use std::time::Duration;
use tracing::debug;

use crate::contexts::patch_validation::apply_failure;
use crate::data::{PatchMode, PatchTool};
use crate::error::Result;
use crate::tools::process::run_with_timeout;

pub struct GnuPatch {
    program: String,
    timeout: Duration,
}

impl GnuPatch {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self { program: program.into(), timeout }
    }

    pub fn arguments(patch_file: &Path, strip: usize, mode: PatchMode) -> Vec<String> {
        let mut args: Vec<String> = match mode {
            PatchMode::DryRun => vec!["--dry-run".into(), "--forward".into()],
            PatchMode::Forward => vec!["--forward".into()],
            PatchMode::Reverse => vec!["--reverse".into()],
        };
        args.push(format!("-p{strip}"));
        args.push("-u".into());
        args.push("--ignore-whitespace".into());
        args.push("-i".into());
        args.push(patch_file.display().to_string());
        args
    }
}

impl PatchTool for GnuPatch {
    fn apply(&self, patch_file: &Path, work_dir: &Path, strip: usize, mode: PatchMode) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(Self::arguments(patch_file, strip, mode)).current_dir(work_dir);
        let output = run_with_timeout(&mut cmd, &self.program, self.timeout)?;
        debug!("{} {:?} {}: {}", self.program, mode, patch_file.display(), output.stdout.trim());

        if output.status.success() {
            Ok(())
        } else {
            Err(apply_failure(patch_file, output.combined()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_flags() {
        let file = Path::new("/w/p.patch");
        assert_eq!(
            GnuPatch::arguments(file, 4, PatchMode::DryRun).join(" "),
            "--dry-run --forward -p4 -u --ignore-whitespace -i /w/p.patch"
        );
        assert_eq!(
            GnuPatch::arguments(file, 4, PatchMode::Forward).join(" "),
            "--forward -p4 -u --ignore-whitespace -i /w/p.patch"
        );
        assert_eq!(
            GnuPatch::arguments(file, 6, PatchMode::Reverse).join(" "),
            "--reverse -p6 -u --ignore-whitespace -i /w/p.patch"
        );
    }
}
