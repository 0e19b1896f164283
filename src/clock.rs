//! Wall-clock helpers shared by metadata writes, the background timers, and
//! the dashboard age strings.
//!
//! Last-write timestamps ("ticks") are signed 64-bit **milliseconds** since
//! the Unix epoch, chosen so tick values round-trip exactly through the `f64`
//! sorted-set scores of a Redis-like store. Access-time scores are whole unix
//! seconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, UTC.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn now_ticks() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Whole seconds since the Unix epoch, UTC.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Renders the age of a tick value for the dashboard: `Xs ago`, `Xm ago`,
/// `Xh ago`, `Xd ago`, `Xmo ago`, or `Xy ago` with floor division at each
/// threshold (60 s, 60 m, 24 h, 30 d, 365 d).
#[must_use]
pub(crate) fn format_age(ticks: i64, now_ticks: i64) -> String {
    let secs = (now_ticks - ticks).max(0) / 1_000;
    if secs < 60 {
        return format!("{secs}s ago");
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{mins}m ago");
    }
    let hours = mins / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    let days = hours / 24;
    if days < 30 {
        return format!("{days}d ago");
    }
    if days < 365 {
        return format!("{}mo ago", days / 30);
    }
    format!("{}y ago", days / 365)
}
