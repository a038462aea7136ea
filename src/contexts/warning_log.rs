//! Splits a resource-leak checker log into per-warning blocks.

use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::data::Finding;

const OWNING_OVERWRITE_MARKER: &str = "Non-final owning field might be overwritten";
/// The overwrite detail sits this many lines below the warning header.
const OWNING_OVERWRITE_OFFSET: usize = 4;

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(/[^\n]+?):(\d+):\s+warning:").expect("valid warning header regex")
    })
}

/// Reads and scans a warning log. An unreadable log yields no findings.
pub fn load_warning_log(path: &Path) -> Vec<Finding> {
    match fs::read(path) {
        Ok(bytes) => parse_warning_log(&String::from_utf8_lossy(&bytes)),
        Err(e) => {
            warn!("Could not read warning log {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Scans `content` for `/abs/path:LINE: warning:` headers.
///
/// Each block runs from its header to the next header or end of input, so the
/// spans of consecutive findings are contiguous. A header with an unusable line
/// number is folded into the block before it.
pub fn parse_warning_log(content: &str) -> Vec<Finding> {
    let headers: Vec<_> = header_re().captures_iter(content).collect();
    let line_starts = line_start_offsets(content);
    let lines: Vec<&str> = content.lines().collect();
    let mut findings: Vec<Finding> = Vec::with_capacity(headers.len());

    for (i, cap) in headers.iter().enumerate() {
        let Some(whole) = cap.get(0) else { continue };
        let start = whole.start();
        let end = headers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(content.len());

        let line = match cap[2].parse::<usize>() {
            Ok(line) if line > 0 => line,
            _ => {
                warn!("Skipping warning header with invalid line number: {}", &cap[0]);
                if let Some(previous) = findings.last_mut() {
                    previous.span.end = end;
                    previous.raw_block = content[previous.span.clone()].trim().to_string();
                }
                continue;
            }
        };

        let header_line = line_starts.partition_point(|&offset| offset <= start) - 1;
        let is_owning_overwrite = lines
            .get(header_line + OWNING_OVERWRITE_OFFSET)
            .is_some_and(|l| l.contains(OWNING_OVERWRITE_MARKER));

        findings.push(Finding {
            filepath: cap[1].to_string(),
            line,
            raw_block: content[start..end].trim().to_string(),
            is_owning_overwrite,
            method: None,
            span: start..end,
        });
    }

    debug!("Parsed {} warning blocks", findings.len());
    findings
}

fn line_start_offsets(content: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(content.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
Compiling 3 files
/home/u/proj/src/a/Reader.java:25: warning: [required.method.not.called] @MustCall method close may not have been invoked on in
    InputStream in = new FileInputStream(f);
                     ^
  The type of object is: java.io.FileInputStream.
/home/u/proj/src/a/Writer.java:40: warning: [required.method.not.called] field out
    this.out = new FileOutputStream(f);
         ^
  Reason:
  Non-final owning field might be overwritten
2 warnings
";

    #[test]
    fn test_blocks_are_contiguous_and_complete() {
        let findings = parse_warning_log(LOG);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].span.end, findings[1].span.start);
        assert_eq!(findings[1].span.end, LOG.len());

        assert_eq!(findings[0].filepath, "/home/u/proj/src/a/Reader.java");
        assert_eq!(findings[0].line, 25);
        assert!(findings[0].raw_block.contains("The type of object is"));
        assert!(!findings[0].raw_block.contains("Writer.java"));
        assert!(findings[1].raw_block.ends_with("2 warnings"));
        assert!(findings.iter().all(|f| f.method.is_none()));
    }

    #[test]
    fn test_owning_overwrite_lookahead() {
        let findings = parse_warning_log(LOG);
        assert!(!findings[0].is_owning_overwrite);
        assert!(findings[1].is_owning_overwrite);
    }

    #[test]
    fn test_empty_and_headerless_logs() {
        assert!(parse_warning_log("").is_empty());
        assert!(parse_warning_log("relative/A.java:3: warning: x\n").is_empty());
    }

    #[test]
    fn test_zero_line_is_skipped() {
        let findings = parse_warning_log("/p/src/A.java:0: warning: x\n/p/src/B.java:7: warning: y\n");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, 7);
    }

    #[test]
    fn test_invalid_header_keeps_spans_contiguous() {
        let log = "/p/src/A.java:3: warning: a\n/p/src/B.java:0: warning: b\n\
                   /p/src/C.java:99999999999999999999999: warning: c\n/p/src/D.java:9: warning: d\n";
        let findings = parse_warning_log(log);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].span.start, 0);
        assert_eq!(findings[0].span.end, findings[1].span.start);
        assert_eq!(findings[1].span.end, log.len());
        assert!(findings[0].raw_block.contains("B.java:0"));
        assert!(findings[0].raw_block.contains("C.java"));
        assert_eq!(findings[1].line, 9);
    }

    #[test]
    fn test_missing_log_yields_nothing() {
        assert!(load_warning_log(Path::new("/nonexistent/warnings.log")).is_empty());
    }
}
