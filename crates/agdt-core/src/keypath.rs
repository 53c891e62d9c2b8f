//! Dotted-path access into a JSON object: `"jira.issue_key"` addresses
//! `doc["jira"]["issue_key"]`.

use serde_json::{Map, Value};

fn segments(key: &str) -> impl Iterator<Item = &str> {
    key.split('.').filter(|s| !s.is_empty())
}

/// Look up `key`, returning `None` if any segment is missing or a
/// non-object is hit along the way.
pub fn get<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    let mut cur = doc;
    for seg in segments(key) {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur)
}

/// Set `key` to `value`, creating intermediate objects as needed.
/// A scalar sitting where an intermediate object is required is replaced.
pub fn set(doc: &mut Value, key: &str, value: Value) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let parts: Vec<&str> = segments(key).collect();
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    let mut cur = doc;
    for seg in parents {
        let map = match cur {
            Value::Object(map) => map,
            _ => unreachable!("intermediate is always an object"),
        };
        let entry = map
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        cur = entry;
    }
    if let Value::Object(map) = cur {
        map.insert((*last).to_string(), value);
    }
}

/// Remove `key`. Returns whether it existed. Empty parents are left in place.
pub fn remove(doc: &mut Value, key: &str) -> bool {
    let parts: Vec<&str> = segments(key).collect();
    let Some((last, parents)) = parts.split_last() else {
        return false;
    };
    let mut cur = doc;
    for seg in parents {
        match cur.as_object_mut().and_then(|m| m.get_mut(*seg)) {
            Some(next) => cur = next,
            None => return false,
        }
    }
    cur.as_object_mut()
        .map(|m| m.remove(*last).is_some())
        .unwrap_or(false)
}

/// Render a value for display: strings unquoted, everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_round_trip() {
        let mut doc = json!({});
        set(&mut doc, "a.b.c", json!("v"));
        assert_eq!(get(&doc, "a.b.c"), Some(&json!("v")));
        assert_eq!(doc, json!({"a": {"b": {"c": "v"}}}));
    }

    #[test]
    fn set_only_creates_missing_intermediates() {
        let mut doc = json!({"a": {"keep": 1}});
        set(&mut doc, "a.b", json!(2));
        assert_eq!(doc, json!({"a": {"keep": 1, "b": 2}}));
    }

    #[test]
    fn set_replaces_scalar_intermediate() {
        let mut doc = json!({"jira": "oops"});
        set(&mut doc, "jira.issue_key", json!("DFLY-1"));
        assert_eq!(get(&doc, "jira.issue_key"), Some(&json!("DFLY-1")));
    }

    #[test]
    fn get_through_scalar_is_none() {
        let doc = json!({"a": 1});
        assert!(get(&doc, "a.b").is_none());
        assert!(get(&doc, "missing").is_none());
    }

    #[test]
    fn remove_reports_existence() {
        let mut doc = json!({"a": {"b": 1}});
        assert!(remove(&mut doc, "a.b"));
        assert!(!remove(&mut doc, "a.b"));
        assert!(!remove(&mut doc, "x.y"));
        assert_eq!(doc, json!({"a": {}}));
    }

    #[test]
    fn display_strings_unquoted() {
        assert_eq!(display_value(&json!("x")), "x");
        assert_eq!(display_value(&json!(3)), "3");
        assert_eq!(display_value(&json!({"a": 1})), r#"{"a":1}"#);
    }
}
