//! Display string for the two clocks.

use chrono::format::{Item, StrftimeItems};
use chrono::DateTime;
use chrono_tz::Tz;
use std::fmt::Write;

use crate::error::{ClockError, Result};

/// Separator between the primary and secondary clock
pub const PAIR_SEPARATOR: &str = " / ";

/// Reject patterns with directives chrono cannot render
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(ClockError::InvalidPattern(pattern.to_string()));
    }
    Ok(())
}

/// Render a single timestamp with a strftime-style pattern
pub fn format_time(ts: &DateTime<Tz>, pattern: &str) -> Result<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ClockError::InvalidPattern(pattern.to_string()));
    }

    let mut out = String::new();
    write!(out, "{}", ts.format_with_items(items.iter()))
        .map_err(|_| ClockError::InvalidPattern(pattern.to_string()))?;
    Ok(out)
}

fn labelled(label: Option<&str>, formatted: String) -> String {
    match label.filter(|l| !l.is_empty()) {
        Some(label) => format!("{}: {}", label, formatted),
        None => formatted,
    }
}

/// Combine both clocks into `"<label>: <primary> / <label>: <secondary>"`.
///
/// Absent (or empty) labels drop their `"<label>: "` prefix.
pub fn format_pair(
    primary: &DateTime<Tz>,
    secondary: &DateTime<Tz>,
    primary_label: Option<&str>,
    secondary_label: Option<&str>,
    pattern: &str,
) -> Result<String> {
    let first = labelled(primary_label, format_time(primary, pattern)?);
    let second = labelled(secondary_label, format_time(secondary, pattern)?);
    Ok(format!("{}{}{}", first, PAIR_SEPARATOR, second))
}
