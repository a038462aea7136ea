//! Unified diff generation, parsing and application.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{PipelineError, Result};

/// Context lines around each change, as `diff -u` and `patch` expect.
pub const DEFAULT_CONTEXT: usize = 3;
/// Above this many LCS cells the changed middle is emitted as one replacement.
const LCS_CELL_LIMIT: usize = 16_000_000;
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<Hunk>,
}

impl FilePatch {
    /// Path the patch should be applied to.
    pub fn target_path(&self) -> Option<&str> {
        self.old_path.as_deref().or(self.new_path.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkLine {
    pub kind: HunkLineKind,
    pub text: String,
    /// Followed by `\ No newline at end of file`.
    pub missing_newline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkLineKind {
    Context,
    Add,
    Remove,
}

impl HunkLineKind {
    fn reversed(self) -> Self {
        match self {
            HunkLineKind::Add => HunkLineKind::Remove,
            HunkLineKind::Remove => HunkLineKind::Add,
            HunkLineKind::Context => HunkLineKind::Context,
        }
    }
}

impl Hunk {
    /// The hunk that undoes this one.
    pub fn reversed(&self) -> Hunk {
        Hunk {
            old_start: self.new_start,
            old_count: self.new_count,
            new_start: self.old_start,
            new_count: self.old_count,
            lines: self
                .lines
                .iter()
                .map(|l| HunkLine { kind: l.kind.reversed(), ..l.clone() })
                .collect(),
        }
    }
}

/// Parses every `--- `/`+++ ` file section of `diff`.
///
/// Hunk bodies are consumed by the counts in their headers, so removed lines
/// that happen to start with `-- ` are never mistaken for a new file header.
pub fn parse_unified_diff(diff: &str) -> Result<Vec<FilePatch>> {
    let mut lines = diff.lines().peekable();
    let mut patches = Vec::new();

    while let Some(line) = lines.next() {
        if !line.starts_with("--- ") {
            continue;
        }
        let old_path = extract_patch_path(line, "--- ");
        let new_path = match lines.next() {
            Some(next) if next.starts_with("+++ ") => extract_patch_path(next, "+++ "),
            _ => return Err(malformed(format!("`{line}` is not followed by a +++ header"))),
        };

        let mut hunks = Vec::new();
        while let Some(header) = lines.next_if(|l| l.starts_with("@@ ")) {
            let (old_start, old_count, new_start, new_count) = parse_hunk_header(header)?;
            let mut hunk_lines: Vec<HunkLine> = Vec::new();
            let (mut old_seen, mut new_seen) = (0, 0);

            while old_seen < old_count || new_seen < new_count {
                let Some(raw) = lines.next() else {
                    return Err(malformed(format!("hunk `{header}` ends early")));
                };
                let (kind, text) = match raw.chars().next() {
                    None => (HunkLineKind::Context, ""),
                    Some(' ') => (HunkLineKind::Context, &raw[1..]),
                    Some('+') => (HunkLineKind::Add, &raw[1..]),
                    Some('-') => (HunkLineKind::Remove, &raw[1..]),
                    Some('\\') => continue,
                    Some(_) => return Err(malformed(format!("unexpected hunk line `{raw}`"))),
                };
                match kind {
                    HunkLineKind::Context => {
                        old_seen += 1;
                        new_seen += 1;
                    }
                    HunkLineKind::Remove => old_seen += 1,
                    HunkLineKind::Add => new_seen += 1,
                }
                hunk_lines.push(HunkLine {
                    kind,
                    text: text.strip_suffix('\r').unwrap_or(text).to_string(),
                    missing_newline: false,
                });
                while lines.next_if(|l| l.starts_with('\\')).is_some() {
                    if let Some(last) = hunk_lines.last_mut() {
                        last.missing_newline = true;
                    }
                }
            }

            hunks.push(Hunk { old_start, old_count, new_start, new_count, lines: hunk_lines });
        }

        patches.push(FilePatch { old_path, new_path, hunks });
    }

    if patches.is_empty() {
        return Err(malformed("no file patches found".to_string()));
    }
    Ok(patches)
}

fn malformed(detail: String) -> PipelineError {
    PipelineError::MalformedDiff(detail)
}

fn extract_patch_path(line: &str, prefix: &str) -> Option<String> {
    let raw = line.strip_prefix(prefix).unwrap_or("").trim();
    // Trailing metadata such as timestamps is tab separated; keep the path only.
    let path = raw.split('\t').next().unwrap_or("").trim();
    if path.is_empty() || path == "/dev/null" {
        None
    } else {
        Some(path.to_string())
    }
}

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@\s+-(\d+)(?:,(\d+))?\s+\+(\d+)(?:,(\d+))?\s+@@").expect("valid regex")
    })
}

fn parse_hunk_header(line: &str) -> Result<(usize, usize, usize, usize)> {
    // @@ -oldStart[,oldCount] +newStart[,newCount] @@
    let cap = hunk_header_re()
        .captures(line)
        .ok_or_else(|| malformed(format!("invalid hunk header `{line}`")))?;
    let number = |i: usize, default: usize| -> Result<usize> {
        match cap.get(i) {
            Some(m) => m
                .as_str()
                .parse::<usize>()
                .map_err(|e| malformed(format!("invalid number in `{line}`: {e}"))),
            None => Ok(default),
        }
    };
    Ok((number(1, 0)?, number(2, 1)?, number(3, 0)?, number(4, 1)?))
}

/// Drops `strip` leading components from a patch path, like `patch -pN`.
pub fn strip_components(path: &str, strip: usize) -> Option<String> {
    let segments: Vec<&str> = path.split('/').collect();
    if strip >= segments.len() {
        return None;
    }
    let rest = segments[strip..].join("/");
    if rest.is_empty() { None } else { Some(rest) }
}

/// File text as lines without terminators, plus the terminator each line had.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBuffer {
    pub lines: Vec<String>,
    /// `true` where the line ended in `\r\n`, parallel to `lines`.
    pub crlf: Vec<bool>,
    pub trailing_newline: bool,
}

impl LineBuffer {
    pub fn from_text(text: &str) -> Self {
        // `split_terminator` does not invent an empty line after a final '\n'.
        let (lines, crlf) = text
            .split_terminator('\n')
            .map(|l| match l.strip_suffix('\r') {
                Some(stripped) => (stripped.to_string(), true),
                None => (l.to_string(), false),
            })
            .unzip();
        LineBuffer { lines, crlf, trailing_newline: text.is_empty() || text.ends_with('\n') }
    }

    /// Line ending used by most terminated lines; ties go to LF.
    pub fn prefers_crlf(&self) -> bool {
        let terminated = if self.trailing_newline { self.lines.len() } else { self.lines.len().saturating_sub(1) };
        let crlf = self.crlf.iter().take(terminated).filter(|&&c| c).count();
        crlf * 2 > terminated
    }

    pub fn to_text(&self) -> String {
        let mut text = String::new();
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            text.push_str(line);
            if i < last || self.trailing_newline {
                text.push_str(if self.crlf.get(i).copied().unwrap_or(false) { "\r\n" } else { "\n" });
            }
        }
        text
    }
}

/// Applies `hunks` in order, searching around each hunk's stated position.
///
/// With `ignore_whitespace`, lines compare equal when their whitespace-separated
/// words are equal. Context lines keep their original terminator and added lines
/// take the buffer's dominant one.
pub fn apply_hunks(
    buffer: &LineBuffer,
    hunks: &[Hunk],
    ignore_whitespace: bool,
) -> std::result::Result<LineBuffer, String> {
    let added_crlf = buffer.prefers_crlf();
    let mut current = buffer.lines.clone();
    let mut crlf = buffer.crlf.clone();
    crlf.resize(current.len(), false);
    let mut trailing_newline = buffer.trailing_newline;
    let mut offset: isize = 0;

    for h in hunks {
        let pattern = hunk_preimage_pattern(h);
        // A pure insertion names the line it follows rather than the first line it replaces.
        let stated = if h.old_count == 0 { h.old_start as isize } else { h.old_start as isize - 1 };
        let preferred = (stated + offset).max(0) as usize;

        let start = find_hunk_start(&current, &pattern, preferred, ignore_whitespace)
            .ok_or_else(|| {
                format!(
                    "could not locate hunk @@ -{},{} @@ (preferred_start={}, pattern_len={})",
                    h.old_start,
                    h.old_count,
                    preferred,
                    pattern.len()
                )
            })?;

        let mut pos = start;
        let mut segment: Vec<String> = Vec::new();
        let mut segment_crlf: Vec<bool> = Vec::new();
        let mut last_post_line: Option<&HunkLine> = None;
        for hl in &h.lines {
            match hl.kind {
                HunkLineKind::Context => {
                    segment.push(current[pos].clone());
                    segment_crlf.push(crlf[pos]);
                    pos += 1;
                    last_post_line = Some(hl);
                }
                HunkLineKind::Remove => pos += 1,
                HunkLineKind::Add => {
                    segment.push(hl.text.clone());
                    segment_crlf.push(added_crlf);
                    last_post_line = Some(hl);
                }
            }
        }

        let reaches_eof = pos == current.len();
        offset += segment.len() as isize - (pos - start) as isize;
        current.splice(start..pos, segment);
        crlf.splice(start..pos, segment_crlf);
        if reaches_eof {
            if let Some(last) = last_post_line {
                trailing_newline = !last.missing_newline;
                // A final line that gains a terminator takes the dominant one.
                if trailing_newline && !buffer.trailing_newline {
                    if let Some(flag) = crlf.last_mut() {
                        *flag = added_crlf;
                    }
                }
            }
        }
    }

    Ok(LineBuffer { lines: current, crlf, trailing_newline })
}

fn hunk_preimage_pattern(h: &Hunk) -> Vec<&str> {
    h.lines
        .iter()
        .filter(|hl| hl.kind != HunkLineKind::Add)
        .map(|hl| hl.text.as_str())
        .collect()
}

fn lines_equal(a: &str, b: &str, ignore_whitespace: bool) -> bool {
    if ignore_whitespace {
        a.split_whitespace().eq(b.split_whitespace())
    } else {
        a == b
    }
}

fn find_hunk_start(
    lines: &[String],
    pattern: &[&str],
    preferred: usize,
    ignore_whitespace: bool,
) -> Option<usize> {
    if pattern.is_empty() {
        return Some(preferred.min(lines.len()));
    }
    if lines.len() < pattern.len() {
        return None;
    }

    // Preferred position first, then a bounded fuzz window, then a full scan.
    let try_at = |i: usize| -> bool {
        i + pattern.len() <= lines.len()
            && pattern
                .iter()
                .enumerate()
                .all(|(j, needle)| lines_equal(&lines[i + j], needle, ignore_whitespace))
    };

    if try_at(preferred) {
        return Some(preferred);
    }

    let fuzz: usize = 100;
    let last = lines.len() - pattern.len();
    let start = preferred.saturating_sub(fuzz).min(last);
    let end = (preferred + fuzz).min(last);
    if let Some(i) = (start..=end).find(|&i| try_at(i)) {
        return Some(i);
    }

    (0..=last).find(|&i| try_at(i))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Equal,
    Delete,
    Insert,
}

/// Renders a unified diff turning `old` into `new`, labelled with `path` on both sides.
///
/// Returns an empty string when the texts are identical.
pub fn unified_diff(old: &str, new: &str, path: &str, context: usize) -> String {
    let a: Vec<&str> = old.split_inclusive('\n').collect();
    let b: Vec<&str> = new.split_inclusive('\n').collect();
    if a == b {
        return String::new();
    }

    let script = edit_script(&a, &b);
    let changes: Vec<usize> = script
        .iter()
        .enumerate()
        .filter(|(_, e)| **e != Edit::Equal)
        .map(|(i, _)| i)
        .collect();

    // Group changes separated by at most 2 * context unchanged lines.
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for &c in &changes {
        match groups.last_mut() {
            Some((_, last)) if c - *last - 1 <= 2 * context => *last = c,
            _ => groups.push((c, c)),
        }
    }

    // Old and new line positions before each script entry.
    let mut positions = Vec::with_capacity(script.len() + 1);
    let (mut i, mut j) = (0usize, 0usize);
    for edit in &script {
        positions.push((i, j));
        match edit {
            Edit::Equal => {
                i += 1;
                j += 1;
            }
            Edit::Delete => i += 1,
            Edit::Insert => j += 1,
        }
    }
    positions.push((i, j));

    let mut out = format!("--- {path}\n+++ {path}\n");
    for (first, last) in groups {
        let lo = first.saturating_sub(context);
        let hi = (last + context + 1).min(script.len());
        let (old_lo, new_lo) = positions[lo];
        let (old_hi, new_hi) = positions[hi];
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            format_range(old_lo, old_hi),
            format_range(new_lo, new_hi)
        ));

        for k in lo..hi {
            let (oi, nj) = positions[k];
            let (prefix, text) = match script[k] {
                Edit::Equal => (' ', a[oi]),
                Edit::Delete => ('-', a[oi]),
                Edit::Insert => ('+', b[nj]),
            };
            out.push(prefix);
            out.push_str(text);
            if !text.ends_with('\n') {
                out.push('\n');
                out.push_str(NO_NEWLINE_MARKER);
                out.push('\n');
            }
        }
    }
    out
}

fn format_range(start: usize, stop: usize) -> String {
    let length = stop - start;
    match length {
        1 => format!("{}", start + 1),
        0 => format!("{start},0"),
        _ => format!("{},{}", start + 1, length),
    }
}

fn edit_script(a: &[&str], b: &[&str]) -> Vec<Edit> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];

    let mut script = vec![Edit::Equal; prefix];
    script.extend(lcs_script(mid_a, mid_b));
    script.extend(std::iter::repeat(Edit::Equal).take(suffix));
    script
}

fn lcs_script(a: &[&str], b: &[&str]) -> Vec<Edit> {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 || n.saturating_mul(m) > LCS_CELL_LIMIT {
        let mut script = vec![Edit::Delete; n];
        script.extend(std::iter::repeat(Edit::Insert).take(m));
        return script;
    }

    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut script = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            script.push(Edit::Equal);
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            script.push(Edit::Delete);
            i += 1;
        } else {
            script.push(Edit::Insert);
            j += 1;
        }
    }
    script.extend(std::iter::repeat(Edit::Delete).take(n - i));
    script.extend(std::iter::repeat(Edit::Insert).take(m - j));
    script
}
