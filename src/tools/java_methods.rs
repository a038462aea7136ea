//! Brace-matching Java method locator.
//!
//! Not a parser: it tracks declaration headers between `;`, `{` and `}` while
//! skipping comments and literals, and treats a block as a method body when its
//! header looks like `name(params) [throws ...]`.

use regex::Regex;
use std::fs;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;
use std::sync::OnceLock;
use tracing::debug;

use crate::data::{MethodLocator, MethodRange};

const NON_METHOD_NAMES: [&str; 13] = [
    "if", "for", "while", "switch", "catch", "synchronized", "try", "do", "else", "return", "throw",
    "super", "this",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicJavaLocator;

impl MethodLocator for HeuristicJavaLocator {
    fn locate(&self, file_path: &Path, line: usize) -> Option<MethodRange> {
        match fs::read_to_string(file_path) {
            Ok(source) => find_enclosing_method(&source, line),
            Err(e) => {
                debug!("Cannot read {} for method lookup: {}", file_path.display(), e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Method { start_line: usize },
    Block,
}

/// Returns the outermost method body whose declaration spans `line`.
///
/// The range starts at the first line of the declaration, annotations included.
pub fn find_enclosing_method(source: &str, line: usize) -> Option<MethodRange> {
    let mut best: Option<MethodRange> = None;
    let mut stack: Vec<Frame> = Vec::new();
    let mut header = String::new();
    let mut header_start: Option<usize> = None;
    let mut current = 1;
    // Braces inside parentheses (annotation arrays, lambda arguments) never open a frame.
    let mut paren_depth = 0usize;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\n' => {
                current += 1;
                header.push(' ');
            }
            '/' if chars.peek() == Some(&'/') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        current += 1;
                        break;
                    }
                }
                header.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for n in chars.by_ref() {
                    if n == '\n' {
                        current += 1;
                    }
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
                header.push(' ');
            }
            '"' => {
                header_start.get_or_insert(current);
                if chars.peek() == Some(&'"') {
                    chars.next();
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        skip_text_block(&mut chars, &mut current);
                    }
                } else {
                    skip_quoted(&mut chars, '"', &mut current);
                }
                header.push_str("\"\"");
            }
            '\'' => {
                header_start.get_or_insert(current);
                skip_quoted(&mut chars, '\'', &mut current);
                header.push_str("' '");
            }
            '(' => {
                paren_depth += 1;
                header_start.get_or_insert(current);
                header.push(c);
            }
            ')' => {
                paren_depth = paren_depth.saturating_sub(1);
                header.push(c);
            }
            '{' | '}' | ';' if paren_depth > 0 => header.push(c),
            '{' => {
                let frame = if is_method_header(&header) {
                    Frame::Method { start_line: header_start.unwrap_or(current) }
                } else {
                    Frame::Block
                };
                stack.push(frame);
                header.clear();
                header_start = None;
            }
            '}' => {
                if let Some(Frame::Method { start_line }) = stack.pop() {
                    let range = MethodRange { start_line, end_line: current };
                    if range.contains(line) && best.is_none_or(|b| start_line <= b.start_line) {
                        best = Some(range);
                    }
                }
                header.clear();
                header_start = None;
            }
            ';' => {
                header.clear();
                header_start = None;
            }
            c => {
                if !c.is_whitespace() {
                    header_start.get_or_insert(current);
                }
                header.push(c);
            }
        }
    }
    best
}

fn skip_quoted(chars: &mut Peekable<Chars<'_>>, quote: char, current: &mut usize) {
    while let Some(n) = chars.next() {
        match n {
            '\\' => {
                chars.next();
            }
            '\n' => {
                // Unterminated literal; resynchronise at the line break.
                *current += 1;
                return;
            }
            n if n == quote => return,
            _ => {}
        }
    }
}

fn skip_text_block(chars: &mut Peekable<Chars<'_>>, current: &mut usize) {
    let mut quotes = 0;
    while let Some(n) = chars.next() {
        match n {
            '"' => {
                quotes += 1;
                if quotes == 3 {
                    return;
                }
                continue;
            }
            '\\' => {
                if chars.next() == Some('\n') {
                    *current += 1;
                }
            }
            '\n' => *current += 1,
            _ => {}
        }
        quotes = 0;
    }
}

fn annotation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"@\s*[\w$.]+(?:\s*\((?:[^()]|\([^()]*\))*\))?").expect("valid annotation regex")
    })
}

fn non_method_declaration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:class|interface|enum|record|new)\b").expect("valid declaration regex")
    })
}

fn method_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^[^(){}]*?\b([A-Za-z_$][\w$]*)\s*\([^{}]*\)\s*(?:throws\s+[\w$.,<>\s]+)?$")
            .expect("valid method header regex")
    })
}

fn is_method_header(header: &str) -> bool {
    let stripped = annotation_re().replace_all(header, " ");
    let text = stripped.trim();
    if text.contains('=') || text.contains("->") || non_method_declaration_re().is_match(text) {
        return false;
    }
    method_header_re()
        .captures(text)
        .is_some_and(|caps| !NON_METHOD_NAMES.contains(&&caps[1]))
}
