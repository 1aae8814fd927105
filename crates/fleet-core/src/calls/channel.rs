//! Channel reference parsing
//!
//! Operators paste whatever they have at hand: a call invite link, a plain
//! channel link or an `@handle`. All of them reduce to a public handle that
//! each session then resolves through its own connection.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{FleetError, FleetResult};

// Tried in order, first usable match wins.
static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"t\.me/([^/?\s]+)\?(?:videochat|voicechat)",
        r"t\.me/([^/?\s]+)",
        r"@([A-Za-z0-9_]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Reduce a channel reference to a public handle
///
/// A segment starting with `+` is a private invite, which cannot be resolved
/// by handle; such matches are skipped. Input with no usable match fails with
/// [`FleetError::UnresolvableChannel`].
///
/// ```rust
/// use voicefleet_core::calls::parse_channel_reference;
///
/// assert_eq!(parse_channel_reference("https://t.me/foo?videochat").unwrap(), "foo");
/// assert!(parse_channel_reference("t.me/+abc").is_err());
/// ```
pub fn parse_channel_reference(input: &str) -> FleetResult<String> {
    let input = input.trim();

    for pattern in PATTERNS.iter() {
        let Some(captures) = pattern.captures(input) else {
            continue;
        };
        let Some(segment) = captures.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if segment.starts_with('+') {
            continue;
        }
        return Ok(segment.trim_start_matches('@').to_string());
    }

    Err(FleetError::UnresolvableChannel {
        input: input.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_forms() {
        for input in [
            "https://t.me/foo?videochat",
            "t.me/foo?voicechat",
            "@foo",
            "t.me/foo",
            "https://t.me/foo",
            "  @foo  ",
        ] {
            assert_eq!(parse_channel_reference(input).unwrap(), "foo", "input: {}", input);
        }
    }

    #[test]
    fn test_private_invites_unresolvable() {
        for input in ["@+abc", "t.me/+abc", "https://t.me/+abc?videochat"] {
            assert!(
                matches!(
                    parse_channel_reference(input),
                    Err(FleetError::UnresolvableChannel { .. })
                ),
                "input: {}",
                input
            );
        }
    }

    #[test]
    fn test_garbage_unresolvable() {
        assert!(parse_channel_reference("").is_err());
        assert!(parse_channel_reference("just some words").is_err());
    }

    #[test]
    fn test_link_with_path_keeps_first_segment() {
        assert_eq!(parse_channel_reference("t.me/foo/123").unwrap(), "foo");
    }
}
