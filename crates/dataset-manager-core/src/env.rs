// SPDX-License-Identifier: Apache-2.0

//! Lenient environment readers: unset or unparsable values fall back to
//! the supplied default.

use std::env;
use std::time::Duration;

#[must_use]
pub fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

#[must_use]
pub fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[must_use]
pub fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[must_use]
pub fn env_duration_ms(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_u64(name, default_ms))
}

/// Octal permission bits such as `660` or `0o600`.
#[must_use]
pub fn env_mode(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| parse_octal_mode(&v))
        .unwrap_or(default)
}

#[must_use]
pub fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn parse_octal_mode(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    let mode = u32::from_str_radix(digits, 8).ok()?;
    (mode <= 0o777).then_some(mode)
}

#[cfg(test)]
mod tests {
    use super::{parse_bool, parse_octal_mode};

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn octal_mode_parsing_rejects_out_of_range_bits() {
        assert_eq!(parse_octal_mode("660"), Some(0o660));
        assert_eq!(parse_octal_mode("0o600"), Some(0o600));
        assert_eq!(parse_octal_mode("1777"), None);
        assert_eq!(parse_octal_mode("9"), None);
    }
}
