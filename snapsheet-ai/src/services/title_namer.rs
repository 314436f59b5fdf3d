//! Project title de-duplication

use chrono::{DateTime, TimeZone};
use std::fmt::Display;

/// Return `base`, or `"<base> (N+1)"` when `base` is already taken
///
/// Comparison is case-insensitive. N is the largest existing `"<base> (N)"`
/// suffix, or 1 when there is none.
pub fn unique_title<'a, I>(base: &str, existing: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let base_lower = base.to_lowercase();
    let existing: Vec<String> = existing.into_iter().map(str::to_lowercase).collect();

    if !existing.iter().any(|t| *t == base_lower) {
        return base.to_string();
    }

    let prefix = format!("{} (", base_lower);
    let max_number = existing
        .iter()
        .filter_map(|title| {
            let digits = title.strip_prefix(&prefix)?.strip_suffix(')')?;
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse::<u64>().ok()
        })
        .fold(1, u64::max);

    // Past u64::MAX, take the lowest free number instead
    let taken = |n: u64| existing.contains(&format!("{}{})", prefix, n));
    let mut number = max_number.checked_add(1).filter(|n| !taken(*n)).unwrap_or(2);
    while taken(number) {
        number += 1;
    }

    format!("{} ({})", base, number)
}

/// `"<base> (Oct 19, 02:15 PM)"`, used when existing titles cannot be listed
pub fn timestamp_title<Tz>(base: &str, at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{} ({})", base, at.format("%b %-d, %I:%M %p"))
}
