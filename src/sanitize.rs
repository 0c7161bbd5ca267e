//! Pre-parse repair of entity escaping in E-utilities payloads.
//!
//! E-utilities occasionally echo raw query URLs or free text into their XML,
//! leaving ampersands such as `&usehistory=y` or `IL6 & IL6R` unescaped. A
//! strict parser rejects those documents. [`sanitize_xml`] escapes every `&`
//! that does not start a character or entity reference, and leaves CDATA
//! sections, comments, processing instructions and the document type
//! declaration untouched, so well-formed input passes through unchanged and
//! the function is idempotent.

use std::sync::LazyLock;

use regex::bytes::{Captures, Regex};

static AMPERSAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#[0-9]+;|#x[0-9A-Fa-f]+;|[A-Za-z_:][A-Za-z0-9._:\-]*;)?")
        .expect("ampersand pattern is valid")
});

const VERBATIM: [(&[u8], &[u8]); 3] = [
    (b"<![CDATA[", b"]]>"),
    (b"<!--", b"-->"),
    (b"<?", b"?>"),
];

const DOCTYPE: &[u8] = b"<!DOCTYPE";

pub fn sanitize_xml(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut rest = input;
    while !rest.is_empty() {
        match next_verbatim(rest) {
            Some((start, end)) => {
                escape_text(&rest[..start], &mut out);
                out.extend_from_slice(&rest[start..end]);
                rest = &rest[end..];
            }
            None => {
                escape_text(rest, &mut out);
                break;
            }
        }
    }
    out
}

fn escape_text(text: &[u8], out: &mut Vec<u8>) {
    let replaced = AMPERSAND.replace_all(text, |caps: &Captures<'_>| {
        if caps[0].len() == 1 {
            b"&amp;".to_vec()
        } else {
            caps[0].to_vec()
        }
    });
    out.extend_from_slice(&replaced);
}

/// Byte range of the first region that must be copied verbatim. Unterminated
/// regions run to the end of input.
fn next_verbatim(haystack: &[u8]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for (open, close) in VERBATIM {
        if let Some(start) = find(haystack, open) {
            if best.is_some_and(|(current, _)| current <= start) {
                continue;
            }
            let body = start + open.len();
            let end = find(&haystack[body..], close)
                .map(|pos| body + pos + close.len())
                .unwrap_or(haystack.len());
            best = Some((start, end));
        }
    }
    if let Some(start) = find(haystack, DOCTYPE) {
        if best.is_none_or(|(current, _)| start < current) {
            best = Some((start, doctype_end(haystack, start)));
        }
    }
    best
}

/// End of the declaration opened at `start`: the first `>` outside quoted
/// literals, or the `]` S? `>` closing an internal subset. Comments and
/// processing instructions inside the subset are skipped whole.
fn doctype_end(haystack: &[u8], start: usize) -> usize {
    let mut pos = start + DOCTYPE.len();
    let mut in_subset = false;
    while pos < haystack.len() {
        let rest = &haystack[pos..];
        match rest[0] {
            quote @ (b'"' | b'\'') => {
                pos = skip_past(haystack, pos + 1, &[quote]);
                continue;
            }
            b'[' if !in_subset => in_subset = true,
            b'>' if !in_subset => return pos + 1,
            b'<' if in_subset && rest.starts_with(b"<!--") => {
                pos = skip_past(haystack, pos + 4, b"-->");
                continue;
            }
            b'<' if in_subset && rest.starts_with(b"<?") => {
                pos = skip_past(haystack, pos + 2, b"?>");
                continue;
            }
            b']' if in_subset => {
                let after = pos + 1;
                let gap = haystack[after..]
                    .iter()
                    .take_while(|byte| byte.is_ascii_whitespace())
                    .count();
                if haystack.get(after + gap) == Some(&b'>') {
                    return after + gap + 1;
                }
            }
            _ => {}
        }
        pos += 1;
    }
    haystack.len()
}

/// Position just after the first `close` at or after `from`, or end of input.
fn skip_past(haystack: &[u8], from: usize, close: &[u8]) -> usize {
    find(&haystack[from.min(haystack.len())..], close)
        .map(|found| from + found + close.len())
        .unwrap_or(haystack.len())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
