// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Clock access and glob matching shared by all engines.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock in whole seconds since the Unix epoch.
///
/// Single read point for every expiry and version decision in the crate.
#[inline]
pub fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Smallest byte string greater than every key starting with `prefix`,
/// or `None` when the prefix is all `0xff` and no such bound exists. Used
/// as the seek target for reverse iteration over a prefix range.
pub fn prefix_successor(mut prefix: Vec<u8>) -> Option<Vec<u8>> {
    while let Some(&last) = prefix.last() {
        if last == 0xff {
            prefix.pop();
        } else {
            *prefix.last_mut().unwrap() = last + 1;
            return Some(prefix);
        }
    }
    None
}

/// True if the pattern is `prefix*` with no other metacharacters, the fast
/// path scans use to seek directly to the prefix.
pub fn is_tail_wildcard(pattern: &[u8]) -> bool {
    if pattern.len() < 2 || pattern[pattern.len() - 1] != b'*' {
        return false;
    }
    pattern[..pattern.len() - 1]
        .iter()
        .all(|&b| !matches!(b, b'*' | b'?' | b'[' | b'\\'))
}

/// Glob match over raw bytes: `*` any run, `?` any byte, `[…]` classes with
/// ranges and `^` negation, `\` escapes the next byte.
pub fn string_match(pattern: &[u8], text: &[u8]) -> bool {
    let mut p = 0;
    let mut t = 0;
    // Backtrack point for the most recent `*`.
    let mut star_p: Option<usize> = None;
    let mut star_t = 0;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    // Collapse runs of stars and remember the restart point.
                    while p + 1 < pattern.len() && pattern[p + 1] == b'*' {
                        p += 1;
                    }
                    star_p = Some(p);
                    star_t = t;
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next_p)) = match_class(&pattern[p..], text[t]) {
                        if matched {
                            p += next_p;
                            t += 1;
                            continue;
                        }
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }
        // Mismatch: give the last `*` one more byte, or fail.
        match star_p {
            Some(sp) => {
                star_t += 1;
                p = sp + 1;
                t = star_t;
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Matches one byte against the class starting at `pattern[0] == b'['`.
/// Returns (matched, bytes consumed by the class) or None if the class is
/// unterminated.
fn match_class(pattern: &[u8], byte: u8) -> Option<(bool, usize)> {
    debug_assert_eq!(pattern[0], b'[');
    let mut i = 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        match pattern[i] {
            b']' if !first => return Some((matched != negate, i + 1)),
            b'\\' if i + 1 < pattern.len() => {
                if pattern[i + 1] == byte {
                    matched = true;
                }
                i += 2;
            }
            lo if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' => {
                let hi = pattern[i + 2];
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                if (lo..=hi).contains(&byte) {
                    matched = true;
                }
                i += 3;
            }
            c => {
                if c == byte {
                    matched = true;
                }
                i += 1;
            }
        }
        first = false;
    }
    None
}
