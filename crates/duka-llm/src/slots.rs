use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

/// Hard bounds on the slot map extracted alongside an intent.
const MAX_SLOTS: usize = 20;
const MAX_STRING_LEN: usize = 500;

/// Sanitize a raw slot map from the classifier before it is stored or used
/// as tool parameters.
///
/// Rules:
/// - keys must be `[a-zA-Z0-9_]+`; anything else is dropped
/// - at most 20 entries survive (BTreeMap order, deterministic)
/// - strings longer than 500 chars are dropped; survivors are stripped of
///   control characters and SQL comment markers, then HTML-entity-escaped
/// - numbers must be finite and inside i32 range for integers; NaN,
///   infinities, and overflow are dropped
/// - nested objects/arrays are dropped — slots are scalar by contract
pub fn sanitize_slots(raw: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        if out.len() >= MAX_SLOTS {
            warn!(dropped = raw.len() - MAX_SLOTS, "slot map over limit; excess dropped");
            break;
        }
        if !is_valid_key(key) {
            warn!(key, "slot key rejected");
            continue;
        }
        match value {
            Value::String(s) => {
                if s.chars().count() > MAX_STRING_LEN {
                    warn!(key, len = s.len(), "slot string too long; dropped");
                    continue;
                }
                out.insert(key.clone(), Value::String(sanitize_string(s)));
            }
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i32::try_from(i).is_ok() {
                        out.insert(key.clone(), value.clone());
                    } else {
                        warn!(key, "slot integer outside i32 range; dropped");
                    }
                } else if let Some(f) = n.as_f64() {
                    // serde_json never produces NaN/Infinity from text, but a
                    // provider SDK might hand us one programmatically.
                    if f.is_finite() {
                        out.insert(key.clone(), value.clone());
                    } else {
                        warn!(key, "non-finite slot number; dropped");
                    }
                }
            }
            Value::Bool(_) => {
                out.insert(key.clone(), value.clone());
            }
            Value::Null | Value::Array(_) | Value::Object(_) => {
                warn!(key, "non-scalar slot value; dropped");
            }
        }
    }
    out
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip control characters and SQL comment markers, then HTML-entity-escape.
fn sanitize_string(s: &str) -> String {
    let no_control: String = s.chars().filter(|c| !c.is_control()).collect();
    let no_sql = no_control
        .replace("--", " ")
        .replace("/*", " ")
        .replace("*/", " ");
    html_escape(&no_sql)
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: Vec<(&str, Value)>) -> BTreeMap<String, Value> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn invalid_keys_are_dropped() {
        let raw = map(vec![
            ("good_key1", json!("x")),
            ("bad key", json!("y")),
            ("bad-key", json!("z")),
            ("", json!("w")),
        ]);
        let out = sanitize_slots(&raw);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("good_key1"));
    }

    #[test]
    fn strings_are_escaped_and_scrubbed() {
        let raw = map(vec![(
            "q",
            json!("<script>alert('x')</script> -- DROP TABLE\u{0007}"),
        )]);
        let out = sanitize_slots(&raw);
        let s = out["q"].as_str().unwrap();
        assert!(!s.contains('<'));
        assert!(!s.contains("--"));
        assert!(!s.contains('\u{0007}'));
        assert!(s.contains("&lt;script&gt;"));
    }

    #[test]
    fn oversized_string_dropped() {
        let raw = map(vec![("q", json!("a".repeat(501)))]);
        assert!(sanitize_slots(&raw).is_empty());
    }

    #[test]
    fn numbers_bounded_to_i32() {
        let raw = map(vec![
            ("ok", json!(42)),
            ("too_big", json!(i64::from(i32::MAX) + 1)),
            ("float_ok", json!(19.99)),
        ]);
        let out = sanitize_slots(&raw);
        assert_eq!(out.len(), 2);
        assert!(out.contains_key("ok"));
        assert!(out.contains_key("float_ok"));
    }

    #[test]
    fn map_is_capped_at_twenty() {
        let raw: BTreeMap<String, Value> = (0..30)
            .map(|i| (format!("k{:02}", i), json!(i)))
            .collect();
        assert_eq!(sanitize_slots(&raw).len(), 20);
    }

    #[test]
    fn nested_values_dropped() {
        let raw = map(vec![
            ("obj", json!({"a": 1})),
            ("arr", json!([1, 2])),
            ("null", json!(null)),
            ("flag", json!(true)),
        ]);
        let out = sanitize_slots(&raw);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key("flag"));
    }
}
