//! Dotted-path access over a [`serde_json::Value`] tree.
//!
//! Change batches and load/snapshot payloads both address state with
//! dot-joined paths (`"players.p1.position.x"`): a segment indexes into an
//! object by key, or into an array by parsing as a `usize`. Every segment is
//! checked against [`FORBIDDEN_SEGMENTS`] before it is used to index
//! anything — paths can originate from a remote peer via `load`, and this
//! crate has no prototype chain to pollute, but rejecting these segments
//! keeps a `serde_json::Value` tree from ever acquiring a key that would be
//! dangerous if it were later round-tripped through something that does.

use serde_json::{Map, Value};

use crate::error::PathError;

/// Segments a path is never allowed to address, regardless of source.
pub const FORBIDDEN_SEGMENTS: [&str; 3] = ["__proto__", "constructor", "prototype"];

fn check_segment(path: &str, segment: &str) -> Result<(), PathError> {
    if FORBIDDEN_SEGMENTS.contains(&segment) {
        return Err(PathError::ForbiddenSegment(format!("{path}:{segment}")));
    }
    Ok(())
}

fn split(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

/// Resolve `path` against `root`, returning `None` if any segment along the
/// way is absent (rather than erroring: a missing read is a normal outcome,
/// e.g. while probing whether a field exists).
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in split(path) {
        if FORBIDDEN_SEGMENTS.contains(&segment) {
            return None;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set `path` to `value`, creating intermediate objects as needed. Does not
/// create intermediate arrays: setting `"items.3.name"` requires `items` to
/// already be an array of at least 4 entries.
pub fn set(root: &mut Value, path: &str, value: Value) -> Result<(), PathError> {
    let segments = split(path);
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return Ok(());
    };

    let mut current = root;
    for segment in parents {
        check_segment(path, segment)?;
        current = step_into_mut(current, path, segment)?;
    }
    check_segment(path, last)?;
    write_segment(current, path, last, value)
}

/// Remove the value at `path`, returning it if present.
pub fn remove(root: &mut Value, path: &str) -> Result<Option<Value>, PathError> {
    let segments = split(path);
    let Some((last, parents)) = segments.split_last() else {
        let removed = std::mem::replace(root, Value::Null);
        return Ok(Some(removed));
    };

    let mut current = root;
    for segment in parents {
        check_segment(path, segment)?;
        current = match step_into_mut_opt(current, segment) {
            Some(next) => next,
            None => return Ok(None),
        };
    }
    check_segment(path, last)?;
    Ok(match current {
        Value::Object(map) => map.shift_remove(*last),
        Value::Array(items) => last.parse::<usize>().ok().and_then(|index| {
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        }),
        _ => None,
    })
}

fn step_into_mut<'a>(current: &'a mut Value, path: &str, segment: &str) -> Result<&'a mut Value, PathError> {
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => Ok(map.entry(segment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let index: usize = segment
                .parse()
                .map_err(|_| PathError::NotAContainer { path: path.to_string(), segment: segment.to_string() })?;
            let length = items.len();
            items
                .get_mut(index)
                .ok_or(PathError::IndexOutOfBounds { path: path.to_string(), index, length })
        }
        _ => Err(PathError::NotAContainer { path: path.to_string(), segment: segment.to_string() }),
    }
}

fn step_into_mut_opt<'a>(current: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match current {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?),
        _ => None,
    }
}

fn write_segment(current: &mut Value, path: &str, segment: &str, value: Value) -> Result<(), PathError> {
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => {
            map.insert(segment.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index: usize = segment
                .parse()
                .map_err(|_| PathError::NotAContainer { path: path.to_string(), segment: segment.to_string() })?;
            if index == items.len() {
                items.push(value);
            } else if index < items.len() {
                items[index] = value;
            } else {
                return Err(PathError::IndexOutOfBounds { path: path.to_string(), index, length: items.len() });
            }
            Ok(())
        }
        _ => Err(PathError::NotAContainer { path: path.to_string(), segment: segment.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_walks_nested_objects_and_arrays() {
        let root = json!({"players": {"p1": {"items": [1, 2, 3]}}});
        assert_eq!(get(&root, "players.p1.items.1"), Some(&json!(2)));
        assert_eq!(get(&root, "players.p2"), None);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut root = json!({});
        set(&mut root, "players.p1.name", json!("Ada")).unwrap();
        assert_eq!(get(&root, "players.p1.name"), Some(&json!("Ada")));
    }

    #[test]
    fn set_rejects_forbidden_segment() {
        let mut root = json!({});
        let err = set(&mut root, "__proto__.polluted", json!(true)).unwrap_err();
        assert!(matches!(err, PathError::ForbiddenSegment(_)));
    }

    #[test]
    fn remove_returns_previous_value() {
        let mut root = json!({"a": {"b": 1}});
        let removed = remove(&mut root, "a.b").unwrap();
        assert_eq!(removed, Some(json!(1)));
        assert_eq!(get(&root, "a.b"), None);
    }

    #[test]
    fn set_appends_to_array_at_exact_next_index() {
        let mut root = json!({"items": [1, 2]});
        set(&mut root, "items.2", json!(3)).unwrap();
        assert_eq!(root["items"], json!([1, 2, 3]));
    }

    #[test]
    fn set_errors_on_array_index_gap() {
        let mut root = json!({"items": [1, 2]});
        let err = set(&mut root, "items.5", json!(3)).unwrap_err();
        assert!(matches!(err, PathError::IndexOutOfBounds { .. }));
    }
}
