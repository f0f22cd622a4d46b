//! Topic name and filter validation
//!
//! Rules from the MQTT v3.1.1 topic names and filters section:
//! - Topic names MUST NOT contain wildcards (+ or #)
//! - Multi-level wildcard (#) must be the last level and occupy it entirely
//! - Single-level wildcard (+) must occupy an entire level
//! - Topics starting with $ are not matched by filters starting with a wildcard

const MAX_TOPIC_LEN: usize = 65535;

/// Validate a topic name (used in PUBLISH)
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err("topic name exceeds maximum length");
    }
    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }
    if topic.contains(['+', '#']) {
        return Err("topic name cannot contain wildcards");
    }
    Ok(())
}

/// Validate a topic filter (used in SUBSCRIBE)
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err("topic filter exceeds maximum length");
    }
    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != "#" || levels.peek().is_some()) {
            return Err("multi-level wildcard must be the entire last level");
        }
        if level.contains('+') && level != "+" {
            return Err("single-level wildcard must occupy entire level");
        }
    }

    Ok(())
}

/// Check if a topic filter matches a topic name
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && filter.starts_with(['+', '#']) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for filter_level in filter.split('/') {
        if filter_level == "#" {
            // Also matches the parent level ("a/#" matches "a")
            return true;
        }
        match topic_levels.next() {
            Some(_) if filter_level == "+" => {}
            Some(level) if level == filter_level => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}
