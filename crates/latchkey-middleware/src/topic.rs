//! Topic names and MQTT-style filter matching.
//!
//! Topics are slash-delimited paths.  Filters may use the two MQTT
//! wildcards:
//!
//! | Wildcard | Matches |
//! |---|---|
//! | `+` | exactly one level |
//! | `#` | zero or more trailing levels (last level only) |

use latchkey_types::LatchError;

/// Inbound remote lock commands.
pub const COMMAND_TOPIC: &str = "cmd/lock/state";

/// Outbound lock state telemetry.
pub const STATE_TOPIC: &str = "dt/lock/state";

/// Check that `filter` is a well-formed subscription filter.
///
/// # Errors
///
/// Returns [`LatchError::Broker`] for an empty filter, a `#` that is not the
/// final level, or a wildcard mixed with other characters in one level.
pub fn validate_filter(filter: &str) -> Result<(), LatchError> {
    if filter.is_empty() {
        return Err(LatchError::Broker("empty topic filter".to_string()));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let has_wildcard = level.contains('+') || level.contains('#');
        if has_wildcard && level.len() > 1 {
            return Err(LatchError::Broker(format!(
                "wildcard must occupy a whole level in '{filter}'"
            )));
        }
        if *level == "#" && i + 1 != levels.len() {
            return Err(LatchError::Broker(format!(
                "'#' must be the last level in '{filter}'"
            )));
        }
    }
    Ok(())
}

/// `true` if `topic` is matched by `filter`.
pub fn matches_filter(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// `true` if `filter` contains a wildcard level.
pub fn has_wildcard(filter: &str) -> bool {
    filter.split('/').any(|level| level == "+" || level == "#")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(matches_filter(COMMAND_TOPIC, "cmd/lock/state"));
        assert!(!matches_filter(COMMAND_TOPIC, "cmd/lock"));
        assert!(!matches_filter(COMMAND_TOPIC, "cmd/lock/state/x"));
        assert!(!matches_filter(COMMAND_TOPIC, STATE_TOPIC));
    }

    #[test]
    fn single_level_wildcard() {
        assert!(matches_filter("cmd/+/state", "cmd/lock/state"));
        assert!(matches_filter("+/lock/state", "dt/lock/state"));
        assert!(!matches_filter("cmd/+", "cmd/lock/state"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(matches_filter("cmd/#", "cmd/lock/state"));
        assert!(matches_filter("cmd/#", "cmd"));
        assert!(matches_filter("#", "dt/lock/state"));
        assert!(!matches_filter("dt/#", "cmd/lock/state"));
    }

    #[test]
    fn filter_validation() {
        assert!(validate_filter("cmd/lock/state").is_ok());
        assert!(validate_filter("cmd/+/state").is_ok());
        assert!(validate_filter("cmd/#").is_ok());
        assert!(validate_filter("").is_err());
        assert!(validate_filter("cmd/#/state").is_err());
        assert!(validate_filter("cmd/lo+ck").is_err());
    }

    #[test]
    fn wildcard_detection() {
        assert!(has_wildcard("cmd/#"));
        assert!(has_wildcard("+/lock"));
        assert!(!has_wildcard(COMMAND_TOPIC));
    }
}
