//! Volume curve between API percent and device tenths of a dB.
//!
//! Units report gain in tenths of a decibel, from -1000 (-100 dB) to +120
//! (+12 dB). The control API uses 0-100 percent on a logarithmic curve, so
//! that unity gain sits near 76 percent:
//!
//! ```text
//! n       = log10(1 + p/k) / log10(1 + 100/k)        k = 11
//! tenths  = round(-1000 + n * 1120)
//! ```
//!
//! The inverse uses `p = k * ((1 + 100/k)^n - 1)`. Both directions clamp.

use sislib_core::{Error, Result};

/// Lowest device level, tenths of a dB.
pub const MIN_TENTHS: i32 = -1000;
/// Highest device level, tenths of a dB.
pub const MAX_TENTHS: i32 = 120;
/// Curve shape parameter.
pub const CURVE_K: f64 = 11.0;

const RANGE: f64 = (MAX_TENTHS - MIN_TENTHS) as f64;

fn curve_base() -> f64 {
    1.0 + 100.0 / CURVE_K
}

/// Convert a percent level into device tenths of a dB.
pub fn to_device_units(percent: i32) -> i32 {
    let p = f64::from(percent.clamp(0, 100));
    let n = ((1.0 + p / CURVE_K).log10() / curve_base().log10()).clamp(0.0, 1.0);
    let tenths = (f64::from(MIN_TENTHS) + n * RANGE).round() as i32;
    tenths.clamp(MIN_TENTHS, MAX_TENTHS)
}

/// Convert device tenths of a dB into a percent level.
pub fn to_percent(tenths: i32) -> i32 {
    let t = tenths.clamp(MIN_TENTHS, MAX_TENTHS);
    let n = f64::from(t - MIN_TENTHS) / RANGE;
    let percent = (CURVE_K * (curve_base().powf(n) - 1.0)).round() as i32;
    percent.clamp(0, 100)
}

/// Parse an integer that may arrive quoted or padded.
fn parse_level(s: &str, what: &str) -> Result<i32> {
    let cleaned = s.trim().trim_matches('"').trim();
    let wide = cleaned
        .parse::<i64>()
        .map_err(|_| Error::Argument(format!("{what} must be an integer, got '{s}'")))?;
    Ok(wide.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
}

/// Parse a percent string and convert it to device units.
pub fn percent_to_device(percent: &str) -> Result<i32> {
    Ok(to_device_units(parse_level(percent, "volume percent")?))
}

/// Parse a device level string and convert it to percent.
pub fn device_to_percent(tenths: &str) -> Result<i32> {
    Ok(to_percent(parse_level(tenths, "device level")?))
}
