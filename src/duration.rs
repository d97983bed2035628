//! Human-readable durations for command-line intervals.

use std::time::Duration;

/// Parse a duration such as `10s`, `1h`, `5m` or `500ms`.
///
/// A bare number is taken as seconds.
///
/// # Examples
/// ```
/// use switchbot_mhz19_exporter::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be tried before "m" and "s".
    const UNITS: [(&str, u64); 4] = [("ms", 1), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)];
    let (number, millis_per_unit) = UNITS
        .iter()
        .find_map(|&(suffix, scale)| src.strip_suffix(suffix).map(|n| (n, scale)))
        .unwrap_or((src, 1_000));

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration out of range: {src}"))
}

/// Like [`parse_duration`], but rejects zero, which is not a valid period.
pub fn parse_interval(src: &str) -> Result<Duration, String> {
    match parse_duration(src)? {
        Duration::ZERO => Err("interval must be greater than zero".to_string()),
        interval => Ok(interval),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_duration_with_whitespace() {
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("3 s").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1d").is_err());
        assert!(parse_duration(&format!("{}h", u64::MAX)).is_err());
    }

    #[test]
    fn test_parse_interval_rejects_zero() {
        assert!(parse_interval("0s").is_err());
        assert_eq!(parse_interval("1h").unwrap(), Duration::from_secs(3600));
    }
}
