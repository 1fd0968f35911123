//! Formatting utilities (Telegram HTML escaping, captions, timestamps).

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};

/// Telegram caption limit, in characters.
pub const CAPTION_MAX_CHARS: usize = 1024;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Inline code span with escaped contents.
pub fn code(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}

/// Compact duration: `45s`, `4m5s`, `1h0m7s`. Sub-second parts are dropped.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

/// Truncate to at most `max_chars` characters (not bytes).
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Minute-resolution stamp used as a temp file prefix, e.g. `261016:1405+`.
///
/// Rendered in IST (+05:30), the zone the relay's file names always used.
pub fn file_timestamp(now: DateTime<Utc>) -> String {
    const FORMAT: &str = "%y%m%d:%H%M+";
    match FixedOffset::east_opt(330 * 60) {
        Some(ist) => now.with_timezone(&ist).format(FORMAT).to_string(),
        None => now.format(FORMAT).to_string(),
    }
}
