//! Timestamp scale handling and human-readable timestamps.
//!
//! Matroska stores times as integer ticks of a per-segment scale
//! (nanoseconds per tick, 1 ms by default). Packets carry nanoseconds.

use std::fmt;

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Nanoseconds per tick of a Matroska segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimestampScale(u64);

impl TimestampScale {
    /// The Matroska default scale of one millisecond.
    pub const DEFAULT: Self = Self(1_000_000);

    /// Create a scale; zero is not a valid scale.
    pub fn new(nanos_per_tick: u64) -> Option<Self> {
        (nanos_per_tick > 0).then_some(Self(nanos_per_tick))
    }

    /// Nanoseconds per tick.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Convert nanoseconds to ticks, rounding towards negative infinity.
    pub fn to_ticks(&self, ns: i64) -> i64 {
        ns.div_euclid(self.0 as i64)
    }

    /// Convert nanoseconds to ticks, rounding to the nearest tick.
    pub fn to_ticks_rounded(&self, ns: i64) -> i64 {
        let scale = self.0 as i64;
        (ns + scale / 2).div_euclid(scale)
    }

    /// Convert ticks to nanoseconds.
    pub fn to_nanos(&self, ticks: i64) -> i64 {
        ticks.saturating_mul(self.0 as i64)
    }
}

impl Default for TimestampScale {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Display wrapper printing nanoseconds as `HH:MM:SS.nnnnnnnnn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormattedTimestamp(pub i64);

impl fmt::Display for FormattedTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let nanos = abs % NANOS_PER_SECOND as u64;
        let total_secs = abs / NANOS_PER_SECOND as u64;
        write!(
            f,
            "{}{:02}:{:02}:{:02}.{:09}",
            sign,
            total_secs / 3600,
            (total_secs / 60) % 60,
            total_secs % 60,
            nanos
        )
    }
}

/// Parse a timestamp given as `HH:MM:SS[.fraction]`, `MM:SS[.fraction]`,
/// or a number with a unit suffix (`ns`, `ms`, `s`).
///
/// Returns nanoseconds.
pub fn parse_timestamp(input: &str) -> Option<i64> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some(value) = input.strip_suffix("ns") {
        return value.trim().parse::<i64>().ok();
    }
    if let Some(value) = input.strip_suffix("ms") {
        return value.trim().parse::<f64>().ok().map(|v| (v * 1_000_000.0) as i64);
    }
    if !input.contains(':') {
        let value = input.strip_suffix('s').unwrap_or(input);
        return value
            .trim()
            .parse::<f64>()
            .ok()
            .map(|v| (v * NANOS_PER_SECOND as f64) as i64);
    }

    let (clock, fraction) = match input.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (input, None),
    };

    let mut seconds: i64 = 0;
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    for part in parts {
        let value: i64 = part.parse().ok()?;
        seconds = seconds * 60 + value;
    }

    let mut nanos = seconds.checked_mul(NANOS_PER_SECOND)?;
    if let Some(fraction) = fraction {
        if fraction.is_empty() || fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let padded = format!("{:0<9}", fraction);
        nanos += padded.parse::<i64>().ok()?;
    }
    Some(nanos)
}
