//! Formatting helpers for user-facing step text.

use std::fmt::Write;
use std::time::Duration;

/// Upper bound, in bytes, for error text written to a user's log stream.
pub const MAX_EMITTED_ERROR_BYTES: usize = 1024;

const TRUNCATION_MARKER: &str = "(error truncated)";

/// Compact byte size: `42B`, `1K`, `1.5M`.
pub fn format_byte_size(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [(1 << 40, "T"), (1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];

    if bytes == 0 {
        return "0".to_string();
    }
    for (size, unit) in UNITS {
        if bytes >= size {
            let value = format!("{:.1}", bytes as f64 / size as f64);
            let value = value.strip_suffix(".0").unwrap_or(&value);
            return format!("{}{}", value, unit);
        }
    }
    format!("{}B", bytes)
}

/// Duration in the `1h2m3.5s` style: `0s`, `60ms`, `1.5s`, `1m0s`.
pub fn format_duration(duration: Duration) -> String {
    const MICRO: u128 = 1_000;
    const MILLI: u128 = 1_000_000;
    const SECOND: u128 = 1_000_000_000;

    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < MICRO {
        return format!("{}ns", nanos);
    }
    if nanos < MILLI {
        return format!("{}µs", decimal(nanos, MICRO));
    }
    if nanos < SECOND {
        return format!("{}ms", decimal(nanos, MILLI));
    }

    let secs = duration.as_secs();
    let (hours, minutes) = (secs / 3600, secs % 3600 / 60);
    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{}h", hours);
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{}m", minutes);
    }
    let seconds = u128::from(secs % 60) * SECOND + u128::from(duration.subsec_nanos());
    let _ = write!(out, "{}s", decimal(seconds, SECOND));
    out
}

/// `value / unit` with the remainder as trailing-zero-free decimals.
fn decimal(value: u128, unit: u128) -> String {
    let (whole, rest) = (value / unit, value % unit);
    if rest == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", rest, width = unit.ilog10() as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Cap `text` at [`MAX_EMITTED_ERROR_BYTES`], marker included.
pub fn truncate_error_text(text: &str) -> String {
    if text.len() <= MAX_EMITTED_ERROR_BYTES {
        return text.to_string();
    }
    let mut end = MAX_EMITTED_ERROR_BYTES - TRUNCATION_MARKER.len();
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], TRUNCATION_MARKER)
}
