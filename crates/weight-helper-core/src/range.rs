//! Block label range expansion (`IN01-IN04` → `IN01, IN02, IN03, IN04`).

use regex::Regex;
use std::sync::OnceLock;

fn range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The `regex` crate has no backreferences, so the prefix equality is
    // checked after the match.
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z]+)(\d{1,3})-([A-Z]+)(\d{1,3})$").expect("range pattern is valid")
    })
}

/// Expands a single range token into an ordered label list.
///
/// A token of the form `PREFIXnn-PREFIXmm` yields every label from `nn` to
/// `mm` inclusive, counting down when `mm < nn`. Indices have at most three
/// digits and are zero-padded to two. Anything else is returned unchanged as
/// a one-element list.
///
/// # Example
///
/// ```
/// use weight_helper_core::expand_range;
///
/// assert_eq!(expand_range("IN01-IN03"), vec!["IN01", "IN02", "IN03"]);
/// assert_eq!(expand_range("OUT05-OUT04"), vec!["OUT05", "OUT04"]);
/// assert_eq!(expand_range("BASE"), vec!["BASE"]);
/// ```
pub fn expand_range(token: &str) -> Vec<String> {
    let Some(caps) = range_regex().captures(token) else {
        return vec![token.to_string()];
    };
    let prefix = &caps[1];
    if prefix != &caps[3] {
        return vec![token.to_string()];
    }
    let (Ok(start), Ok(end)) = (caps[2].parse::<u32>(), caps[4].parse::<u32>()) else {
        return vec![token.to_string()];
    };

    let label = |i: u32| format!("{prefix}{i:02}");
    if start <= end {
        (start..=end).map(label).collect()
    } else {
        (end..=start).rev().map(label).collect()
    }
}

/// Expands a comma-separated group expression token by token.
///
/// Results are concatenated with duplicates removed, keeping the first
/// occurrence. Tokens are trimmed; empty tokens are skipped.
pub fn expand_group(expr: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in expr.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        for label in expand_range(token) {
            if !out.contains(&label) {
                out.push(label);
            }
        }
    }
    out
}
