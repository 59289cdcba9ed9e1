//! Character range expressions.
//!
//! `a-zA-Z0-9_.` expands to the 64 characters it names. Only word
//! characters (`[A-Za-z0-9_]`) form range endpoints; any other character
//! followed by `-` is an unterminated range. A backslash makes the next
//! character literal once ranges are expanded, so `\-` is a dash.

use crate::models::ValidationError;
use std::collections::BTreeSet;

fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace every `X-Y` between word characters with the run it names
///
/// Pairs are matched left to right without overlapping, ignoring
/// backslashes, so `\a-c` expands to `\abc`.
fn expand_ranges(chars: &[char]) -> Result<Vec<char>, ValidationError> {
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        match chars.get(i..i + 3) {
            Some(&[from, '-', to]) if is_word(from) && is_word(to) => {
                if from > to {
                    return Err(ValidationError::Range(format!(
                        "Invalid range \"{}-{}\"",
                        from, to
                    )));
                }
                out.extend(from..=to);
                i += 3;
            }
            _ => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// First dash left over after expansion that is not escaped
fn find_unterminated(chars: &[char]) -> Option<String> {
    if chars.first() == Some(&'-') {
        return Some(chars.iter().take(2).collect());
    }

    chars
        .windows(2)
        .find(|pair| pair[0] != '\\' && pair[1] == '-')
        .map(|pair| pair.iter().collect())
}

fn unescape(chars: &[char]) -> Vec<char> {
    let mut out = Vec::with_capacity(chars.len());
    let mut iter = chars.iter();

    while let Some(&c) = iter.next() {
        match c {
            // A trailing backslash has nothing to escape and stays literal
            '\\' => out.push(iter.next().copied().unwrap_or('\\')),
            c => out.push(c),
        }
    }

    out
}

/// Expand a range expression into a sorted, deduplicated alphabet
///
/// Fails on whitespace, inverted bounds, and on any unescaped `-` that
/// does not sit between two word characters.
pub fn flatten(expr: &str) -> Result<Vec<char>, ValidationError> {
    if expr.chars().any(char::is_whitespace) {
        return Err(ValidationError::Range("Can't contain whitespace".to_string()));
    }

    let chars: Vec<char> = expr.chars().collect();
    let expanded = expand_ranges(&chars)?;

    if let Some(invalid) = find_unterminated(&expanded) {
        return Err(ValidationError::Range(format!(
            "Unterminated range \"{}\"",
            invalid
        )));
    }

    let out: BTreeSet<char> = unescape(&expanded).into_iter().collect();
    Ok(out.into_iter().collect())
}

/// Whether `expr` is a valid range expression
pub fn check(expr: &str) -> bool {
    flatten(expr).is_ok()
}
