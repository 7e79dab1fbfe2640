//! Go-style duration strings.
//!
//! Session durations arrive from flags and request forms in the `"4h"`,
//! `"90m"`, `"1h30m"` format. Only the units that make sense for session
//! lifetimes are supported.

use std::time::Duration;

use crate::{SandparkError, SandparkResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a duration string of the form `"4h"`, `"30m"`, `"2s"` or a
/// concatenation such as `"1h30m"`.
pub fn parse_duration(input: &str) -> SandparkResult<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(SandparkError::Validation("empty duration".to_string()));
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut matched = false;

    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| invalid(input))?;
        digits.clear();

        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86400,
            _ => return Err(invalid(input)),
        };

        total += Duration::from_secs(value * unit);
        matched = true;
    }

    if !digits.is_empty() || !matched {
        return Err(invalid(input));
    }

    Ok(total)
}

fn invalid(input: &str) -> SandparkError {
    SandparkError::Validation(format!("invalid duration: {}", input))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() -> anyhow::Result<()> {
        assert_eq!(parse_duration("4h")?, Duration::from_secs(4 * 3600));
        assert_eq!(parse_duration("30m")?, Duration::from_secs(30 * 60));
        assert_eq!(parse_duration("2s")?, Duration::from_secs(2));
        assert_eq!(parse_duration("1d")?, Duration::from_secs(86400));
        Ok(())
    }

    #[test]
    fn test_parse_compound() -> anyhow::Result<()> {
        assert_eq!(
            parse_duration("1h30m")?,
            Duration::from_secs(3600 + 30 * 60)
        );
        Ok(())
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("ten minutes").is_err());
    }
}
