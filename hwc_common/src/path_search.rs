//! Typed access to fields of untyped JSON responses.
//!
//! Expressions are dotted paths with optional indexes, e.g. `status`,
//! `instances[0].status`, `job.status` or `tasks[-1].id`.
//! Anything that cannot be resolved is `None`, so call sites always pick an explicit default.

use ::serde_json::Value;

enum Segment<'a> {
    Field(&'a str),
    Index(i64),
}

/// Split an expression into segments, `None` if it is malformed.
fn parse(expr: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    for part in expr.split('.') {
        let (field, mut rest) = match part.find('[') {
            Some(i) => part.split_at(i),
            None => (part, ""),
        };
        if field.is_empty() && rest.is_empty() {
            return None;
        }
        if !field.is_empty() {
            segments.push(Segment::Field(field));
        }
        while !rest.is_empty() {
            let end = rest.find(']')?;
            let index = rest.get(1..end)?.trim().parse().ok()?;
            segments.push(Segment::Index(index));
            rest = &rest[end + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }
    Some(segments)
}

/// Resolve `expr` against `value`.
pub fn path_search<'v>(expr: &str, value: &'v Value) -> Option<&'v Value> {
    parse(expr)?
        .into_iter()
        .try_fold(value, |current, segment| match segment {
            Segment::Field(name) => current.as_object()?.get(name),
            Segment::Index(i) => {
                let array = current.as_array()?;
                let i = if i < 0 {
                    array.len().checked_sub(i.unsigned_abs() as usize)?
                } else {
                    i as usize
                };
                array.get(i)
            }
        })
        .filter(|v| !v.is_null())
}

pub fn path_search_str<'v>(expr: &str, value: &'v Value, default: &'v str) -> &'v str {
    path_search(expr, value)
        .and_then(Value::as_str)
        .unwrap_or(default)
}

pub fn path_search_string(expr: &str, value: &Value) -> Option<String> {
    path_search(expr, value)
        .and_then(Value::as_str)
        .map(str::to_owned)
}

pub fn path_search_i64(expr: &str, value: &Value, default: i64) -> i64 {
    path_search(expr, value)
        .and_then(Value::as_i64)
        .unwrap_or(default)
}

pub fn path_search_bool(expr: &str, value: &Value, default: bool) -> bool {
    path_search(expr, value)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

/// Empty slice when the path does not resolve to an array.
pub fn path_search_array<'v>(expr: &str, value: &'v Value) -> &'v [Value] {
    path_search(expr, value)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use ::serde_json::json;

    use super::*;

    fn body() -> Value {
        json!({
            "status": "RUNNING",
            "broker_num": 3,
            "enable_acl": true,
            "job": {"status": "Completed"},
            "instances": [
                {"id": "a", "status": "BUILD"},
                {"id": "b", "status": "ACTIVE"}
            ],
            "description": null
        })
    }

    #[test]
    fn top_level_field() {
        assert_eq!(path_search_str("status", &body(), ""), "RUNNING");
        assert_eq!(path_search_i64("broker_num", &body(), 0), 3);
        assert!(path_search_bool("enable_acl", &body(), false));
    }

    #[test]
    fn nested_and_indexed() {
        let body = body();
        assert_eq!(path_search_str("job.status", &body, ""), "Completed");
        assert_eq!(path_search_str("instances[0].status", &body, ""), "BUILD");
        assert_eq!(path_search_str("instances[-1].id", &body, ""), "b");
        assert_eq!(path_search_array("instances", &body).len(), 2);
    }

    #[test]
    fn missing_values_fall_back() {
        let body = body();
        assert_eq!(path_search("instances[2]", &body), None);
        assert_eq!(path_search("instances[-3]", &body), None);
        assert_eq!(path_search("job.id", &body), None);
        assert_eq!(path_search("status.code", &body), None);
        assert_eq!(path_search("description", &body), None);
        assert_eq!(path_search_str("description", &body, "none"), "none");
        assert_eq!(path_search_i64("status", &body, -1), -1);
        assert!(path_search_array("job", &body).is_empty());
    }

    #[test]
    fn malformed_expressions() {
        let body = body();
        for expr in ["", ".", "job.", "instances[", "instances[x]", "instances[0]x", "a..b"] {
            assert_eq!(path_search(expr, &body), None, "expr: {}", expr);
        }
    }

    #[test]
    fn index_on_root_array() {
        let body = json!([{"status": "DELETED"}]);
        assert_eq!(path_search_string("[0].status", &body), Some("DELETED".to_owned()));
    }
}
