//! Subset matching for asynchronous hypervisor notifications.

use serde_json::Value;

/// Recursive subset test: every member path in `pattern` must exist in
/// `candidate` with an equal value. Non-object pattern nodes compare by
/// equality.
pub fn object_matches(candidate: &Value, pattern: &Value) -> bool {
    match pattern {
        Value::Object(pattern) => {
            let Some(candidate) = candidate.as_object() else {
                return false;
            };
            pattern.iter().all(|(member, expected)| {
                candidate
                    .get(member)
                    .is_some_and(|value| object_matches(value, expected))
            })
        }
        _ => candidate == pattern,
    }
}
