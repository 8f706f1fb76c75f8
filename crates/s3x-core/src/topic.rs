//! Topic helpers
//!
//! Topics are `/`-separated levels. Patterns may use `+` for exactly one level
//! and a trailing `#` for any number of remaining levels, including none.

use crate::error::BusError;

/// Check whether `topic` matches `pattern`
pub fn matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Validate a subscription pattern
pub fn validate_pattern(pattern: &str) -> Result<(), BusError> {
    if pattern.is_empty() {
        return Err(BusError::InvalidTopic("empty pattern".to_string()));
    }

    let levels: Vec<&str> = pattern.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return Err(BusError::InvalidTopic(format!(
                "'#' must be the last level: {}",
                pattern
            )));
        }
        if level.contains('+') && *level != "+" {
            return Err(BusError::InvalidTopic(format!(
                "'+' must occupy a whole level: {}",
                pattern
            )));
        }
    }
    Ok(())
}

/// Validate a concrete publish topic
pub fn validate_topic(topic: &str) -> Result<(), BusError> {
    if topic.is_empty() || topic.contains('+') || topic.contains('#') {
        return Err(BusError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Substitute `{device}` and `{pin}` placeholders in a topic template
pub fn render(template: &str, device_id: &str, pin: Option<u8>) -> String {
    let rendered = template.replace("{device}", device_id);
    match pin {
        Some(pin) => rendered.replace("{pin}", &pin.to_string()),
        None => rendered
            .replace("/{pin}", "")
            .replace("{pin}", ""),
    }
}
