//! MQTT topic filter matching
//!
//! Topics are `/`-separated levels. In a filter, `+` matches exactly one
//! level and a trailing `#` matches the rest of the topic, including nothing
//! (`a/#` matches `a`). Topics whose first level starts with `$` are never
//! matched by a filter that starts with a wildcard.
//!
//! Matching assumes a filter accepted by [`is_valid_filter`]; callers validate
//! first.

/// Multi-level wildcard
pub const MULTI_LEVEL: &str = "#";
/// Single-level wildcard
pub const SINGLE_LEVEL: &str = "+";

/// Returns true if `topic_name` is selected by `filter`.
pub fn topic_matches(topic_name: &str, filter: &str) -> bool {
    let mut topic = topic_name.split('/');
    let mut levels = filter.split('/').peekable();

    if topic_name.starts_with('$')
        && matches!(levels.peek(), Some(&MULTI_LEVEL) | Some(&SINGLE_LEVEL))
    {
        return false;
    }

    for level in levels {
        if level == MULTI_LEVEL {
            return true;
        }
        match topic.next() {
            Some(_) if level == SINGLE_LEVEL => {}
            Some(t) if t == level => {}
            _ => return false,
        }
    }

    topic.next().is_none()
}

/// Returns true if `filter` contains a wildcard level
pub fn is_wildcard(filter: &str) -> bool {
    filter.contains('+') || filter.contains('#')
}

/// Syntactic check for a subscription filter.
///
/// Rejects empty filters, NUL bytes, `#` anywhere but as the whole last
/// level, and `+`/`#` sharing a level with other characters.
pub fn is_valid_filter(filter: &str) -> bool {
    if filter.is_empty() || filter.contains('\0') {
        return false;
    }
    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        let last = levels.peek().is_none();
        if level.contains('#') && (level != MULTI_LEVEL || !last) {
            return false;
        }
        if level.contains('+') && level != SINGLE_LEVEL {
            return false;
        }
    }
    true
}

/// Syntactic check for a concrete topic name (non-empty, no wildcards, no NUL)
pub fn is_valid_topic_name(topic_name: &str) -> bool {
    !topic_name.is_empty() && !is_wildcard(topic_name) && !topic_name.contains('\0')
}
