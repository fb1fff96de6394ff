//! Time formatting and parsing utilities for the player.
//!
//! - Clock strings for the control surface ("1:05", "1:02:03")
//! - Start offsets found in embed URLs ("90", "1m30s", "01:30")

/// Formats seconds as `M:SS`, or `H:MM:SS` from one hour on.
///
/// Negative and non-finite inputs format as `0:00`.
///
/// # Examples
/// ```
/// # use playercore::time_utils::format_clock;
/// assert_eq!(format_clock(0.0), "0:00");
/// assert_eq!(format_clock(65.4), "1:05");
/// assert_eq!(format_clock(3723.0), "1:02:03");
/// ```
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Formats the time left as `-M:SS`.
pub fn format_remaining(position_seconds: f64, duration_seconds: f64) -> String {
    let remaining = (duration_seconds - position_seconds).max(0.0);
    format!("-{}", format_clock(remaining.ceil()))
}

/// Parses a start offset into seconds.
///
/// Accepts plain seconds (`"90"`, `"90s"`), unit groups (`"1h2m3s"`, `"1m30s"`)
/// and clock strings (`"01:30"`, `"1:02:03"`). Returns `None` for anything else.
///
/// # Examples
/// ```
/// # use playercore::time_utils::parse_offset;
/// assert_eq!(parse_offset("90"), Some(90.0));
/// assert_eq!(parse_offset("1m30s"), Some(90.0));
/// assert_eq!(parse_offset("1:02:03"), Some(3723.0));
/// assert_eq!(parse_offset("soon"), None);
/// ```
pub fn parse_offset(input: &str) -> Option<f64> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if input.contains(':') {
        return parse_clock(input);
    }

    if let Ok(seconds) = input.parse::<u64>() {
        return Some(seconds as f64);
    }

    parse_unit_groups(input)
}

fn parse_clock(input: &str) -> Option<f64> {
    let parts: Vec<&str> = input.split(':').collect();
    if parts.len() > 3 {
        return None;
    }

    let mut total = 0u64;
    for (i, part) in parts.iter().enumerate() {
        let value: u64 = part.parse().ok()?;
        // minutes and seconds fields must stay below 60, the leading field is free
        if i > 0 && value >= 60 {
            return None;
        }
        total = total * 60 + value;
    }
    Some(total as f64)
}

fn parse_unit_groups(input: &str) -> Option<f64> {
    let mut total = 0u64;
    let mut digits = String::new();
    let mut seen_unit = false;

    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let factor = match c.to_ascii_lowercase() {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        let value: u64 = digits.parse().ok()?;
        total += value * factor;
        digits.clear();
        seen_unit = true;
    }

    if !digits.is_empty() || !seen_unit {
        return None;
    }
    Some(total as f64)
}
