//! In-process patch application over parsed unified diffs.
//!
//! Behaves like `patch -u --ignore-whitespace`: every file section must apply
//! cleanly before anything is written, so a rejected patch leaves the tree as it was.
//! Files that are not UTF-8 are handled as Latin-1 so their bytes round-trip.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::contexts::patch_validation::apply_failure;
use crate::contexts::unified_diff::{apply_hunks, parse_unified_diff, strip_components, LineBuffer};
use crate::data::{PatchMode, PatchTool};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Latin1,
}

/// Decodes `bytes` as UTF-8, or byte-per-char as Latin-1 when that fails.
fn decode(bytes: Vec<u8>) -> (String, Encoding) {
    match String::from_utf8(bytes) {
        Ok(text) => (text, Encoding::Utf8),
        Err(e) => (e.into_bytes().iter().map(|&b| char::from(b)).collect(), Encoding::Latin1),
    }
}

fn encode(text: &str, encoding: Encoding) -> std::result::Result<Vec<u8>, String> {
    match encoding {
        Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
        Encoding::Latin1 => text
            .chars()
            .map(|c| u8::try_from(c).map_err(|_| format!("{c:?} cannot be written as Latin-1")))
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPatch;

impl BuiltinPatch {
    pub fn new() -> Self {
        BuiltinPatch
    }
}

impl PatchTool for BuiltinPatch {
    fn apply(&self, patch_file: &Path, work_dir: &Path, strip: usize, mode: PatchMode) -> Result<()> {
        let reject = |detail: String| apply_failure(patch_file, detail);

        let (diff, _) = decode(fs::read(patch_file)?);
        let file_patches = parse_unified_diff(&diff)?;
        if file_patches.is_empty() {
            return Err(reject("no file sections found".to_string()));
        }

        let mut staged: Vec<(PathBuf, String, Encoding)> = Vec::new();
        for file_patch in &file_patches {
            let Some(relative) = file_patch.target_path().and_then(|p| strip_components(p, strip))
            else {
                return Err(reject(format!(
                    "cannot strip {strip} components from {:?}",
                    file_patch.target_path()
                )));
            };
            let target = work_dir.join(&relative);
            // Earlier sections of the same patch may already have touched this file.
            let (current, encoding) = match staged.iter().find(|(p, _, _)| *p == target) {
                Some((_, text, encoding)) => (text.clone(), *encoding),
                None => decode(
                    fs::read(&target).map_err(|e| reject(format!("{}: {e}", target.display())))?,
                ),
            };

            let hunks = match mode {
                PatchMode::Reverse => file_patch.hunks.iter().map(|h| h.reversed()).collect(),
                PatchMode::DryRun | PatchMode::Forward => file_patch.hunks.clone(),
            };
            let patched = apply_hunks(&LineBuffer::from_text(&current), &hunks, true)
                .map_err(|e| reject(format!("{relative}: {e}")))?;

            staged.retain(|(p, _, _)| *p != target);
            staged.push((target, patched.to_text(), encoding));
        }

        if mode == PatchMode::DryRun {
            debug!("{} applies cleanly to {} files", patch_file.display(), staged.len());
            return Ok(());
        }
        let mut encoded = Vec::with_capacity(staged.len());
        for (path, text, encoding) in staged {
            let bytes = encode(&text, encoding).map_err(|e| reject(format!("{}: {e}", path.display())))?;
            encoded.push((path, bytes));
        }
        for (path, bytes) in encoded {
            debug!("Patched {}", path.display());
            fs::write(&path, bytes)?;
        }
        Ok(())
    }
}
