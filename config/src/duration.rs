//! Duration strings such as `"1.5s"`, `"100ms"`, `"2m"` or `"1h30m"`.

use std::time::Duration;

const NANOS_PER_UNIT: &[(&str, f64)] = &[
    ("ns", 1.0),
    ("us", 1e3),
    ("µs", 1e3),
    ("μs", 1e3),
    ("ms", 1e6),
    ("s", 1e9),
    ("m", 60e9),
    ("h", 3600e9),
];

/// Parse a sequence of decimal numbers, each with an optional fraction and a
/// required unit suffix (`ns`, `us`/`µs`, `ms`, `s`, `m`, `h`). A bare `"0"` is
/// also accepted. Negative durations are rejected.
#[must_use]
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let text = raw.trim();
    if text == "0" {
        return Some(Duration::ZERO);
    }
    if text.is_empty() {
        return None;
    }

    let mut rest = text;
    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return None;
        }
        let number: f64 = rest[..number_end].parse().ok()?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        let (_, scale) = NANOS_PER_UNIT.iter().find(|(name, _)| *name == unit)?;
        nanos += number * scale;
        rest = &rest[unit_end..];
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos.round() as u64))
}
