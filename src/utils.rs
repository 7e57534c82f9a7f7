use std::time::Duration;

/// Parses a duration string in the format "500ms", "10s", "2m", "1h".
///
/// A bare number is treated as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("duration string cannot be empty".to_string());
    }

    let (value_str, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, "s"),
    };

    let value: u64 = value_str
        .parse()
        .map_err(|_| format!("invalid numeric value in duration: '{}'", value_str))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unknown duration unit: '{}'. Use 'ms', 's', 'm', or 'h'.",
            unit
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_bare_number_is_seconds() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("fast").is_err());
    }
}
