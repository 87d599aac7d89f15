//! Update operator application
//!
//! Applies the operators of a [`Mutation`] to a stored document. Used by
//! [`MemoryStore`](super::MemoryStore); the document is only replaced when
//! every operator succeeded.

use serde_json::{Map, Number, Value};

use super::error::{StoreError, StoreResult};
use crate::document::{Mutation, Operator};

/// Apply every operator of `mutation` to `document`, in order
pub fn apply(document: &Map<String, Value>, mutation: &Mutation) -> StoreResult<Map<String, Value>> {
    let mut doc = Value::Object(document.clone());

    for entry in &mutation.ops {
        for (raw_path, value) in &entry.fields {
            let path = resolve_positional(&doc, raw_path, &mutation.query)?;
            apply_one(&mut doc, &entry.operator, &path, value)?;
        }
    }

    match doc {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::Document("document root must be an object".into())),
    }
}

fn apply_one(doc: &mut Value, operator: &Operator, path: &str, value: &Value) -> StoreResult<()> {
    let invalid = |reason: &str| StoreError::InvalidOperation {
        operator: operator.to_string(),
        path: path.to_string(),
        reason: reason.to_string(),
    };

    match operator {
        Operator::Set => {
            *slot(doc, path).ok_or_else(|| invalid("path crosses a scalar"))? = value.clone();
        }
        Operator::Unset => {
            remove(doc, path);
        }
        Operator::Inc => {
            let target = slot(doc, path).ok_or_else(|| invalid("path crosses a scalar"))?;
            *target = match (&*target, value) {
                (Value::Null, Value::Number(_)) => value.clone(),
                (Value::Number(a), Value::Number(b)) => add(a, b),
                _ => return Err(invalid("$inc requires numbers")),
            };
        }
        Operator::Push | Operator::PushAll | Operator::AddToSet => {
            let items: Vec<Value> = match (operator, value) {
                (Operator::PushAll, Value::Array(items)) => items.clone(),
                (Operator::PushAll, _) => return Err(invalid("$pushAll requires an array")),
                _ => match each(value) {
                    Some(items) => items.to_vec(),
                    None => vec![value.clone()],
                },
            };
            let array = array_slot(doc, path).ok_or_else(|| invalid("target is not an array"))?;
            for item in items {
                if *operator == Operator::AddToSet && array.contains(&item) {
                    continue;
                }
                array.push(item);
            }
        }
        Operator::Pull | Operator::PullAll => {
            let conditions: Vec<Value> = match (operator, value) {
                (Operator::PullAll, Value::Array(items)) => items.clone(),
                (Operator::PullAll, _) => return Err(invalid("$pullAll requires an array")),
                _ => vec![value.clone()],
            };
            match get_mut(doc, path) {
                Some(Value::Array(array)) => {
                    array.retain(|element| !conditions.iter().any(|c| matches(element, c)));
                }
                Some(_) => return Err(invalid("target is not an array")),
                None => {}
            }
        }
        Operator::Pop => {
            let from_front = value.as_i64().map(|n| n < 0).unwrap_or(false);
            match get_mut(doc, path) {
                Some(Value::Array(array)) if from_front => {
                    if !array.is_empty() {
                        array.remove(0);
                    }
                }
                Some(Value::Array(array)) => {
                    array.pop();
                }
                Some(_) => return Err(invalid("target is not an array")),
                None => {}
            }
        }
        Operator::Rename => {
            let target = value.as_str().ok_or_else(|| invalid("$rename target must be a string"))?;
            if let Some(moved) = remove(doc, path) {
                *slot(doc, target).ok_or_else(|| invalid("path crosses a scalar"))? = moved;
            }
        }
        Operator::Other(name) => return Err(StoreError::UnsupportedOperator(name.clone())),
    }

    Ok(())
}

fn each(value: &Value) -> Option<&[Value]> {
    value
        .as_object()
        .filter(|m| m.len() == 1)
        .and_then(|m| m.get("$each"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
}

fn add(a: &Number, b: &Number) -> Value {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Value::from(x.saturating_add(y)),
        _ => {
            let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
            Number::from_f64(sum).map(Value::Number).unwrap_or(Value::Null)
        }
    }
}

/// `$pull` conditions match equal values, or object elements containing
/// every key/value of an object condition
fn matches(element: &Value, condition: &Value) -> bool {
    match (element, condition) {
        (Value::Object(el), Value::Object(cond)) => {
            cond.iter().all(|(k, v)| el.get(k).map(|e| e == v).unwrap_or(false))
        }
        _ => element == condition,
    }
}

/// Replace a `$` segment with the index of the first array element matched
/// by the query criteria rooted at the same array
fn resolve_positional(doc: &Value, path: &str, query: &Map<String, Value>) -> StoreResult<String> {
    let Some(pos) = path.split('.').position(|seg| seg == "$") else {
        return Ok(path.to_string());
    };

    let segments: Vec<&str> = path.split('.').collect();
    let array_path = segments[..pos].join(".");
    let not_found = || StoreError::InvalidOperation {
        operator: "$".to_string(),
        path: path.to_string(),
        reason: "no array element matches the query".to_string(),
    };

    let Some(Value::Array(items)) = get(doc, &array_path) else {
        return Err(not_found());
    };

    let prefix = format!("{}.", array_path);
    let index = items
        .iter()
        .position(|item| {
            let mut relevant = query
                .iter()
                .filter(|(k, _)| k.as_str() == array_path || k.starts_with(&prefix))
                .peekable();
            relevant.peek().is_some()
                && relevant.all(|(k, v)| match k.strip_prefix(&prefix) {
                    Some(sub) => get(item, sub) == Some(v),
                    None => matches(item, v),
                })
        })
        .ok_or_else(not_found)?;

    let mut resolved: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
    resolved[pos] = index.to_string();
    Ok(resolved.join("."))
}

fn get<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |node, seg| match node {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn get_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.').try_fold(doc, |node, seg| match node {
        Value::Object(map) => map.get_mut(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
        _ => None,
    })
}

/// Mutable slot at `path`, creating intermediate objects; `None` when the
/// path crosses a scalar or an out of range array index
fn slot<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.').try_fold(doc, |node, seg| {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        match node {
            Value::Object(map) => Some(map.entry(seg.to_string()).or_insert(Value::Null)),
            Value::Array(items) => seg.parse::<usize>().ok().and_then(move |i| items.get_mut(i)),
            _ => None,
        }
    })
}

fn array_slot<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Vec<Value>> {
    let target = slot(doc, path)?;
    if target.is_null() {
        *target = Value::Array(Vec::new());
    }
    target.as_array_mut()
}

fn remove(doc: &mut Value, path: &str) -> Option<Value> {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (get_mut(doc, parent)?, last),
        None => (doc, path),
    };
    match parent {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => {
            // unsetting an element leaves a hole, as document stores do
            let i = last.parse::<usize>().ok()?;
            items.get_mut(i).map(|v| std::mem::replace(v, Value::Null))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(doc: Value, query: Value, ops: Value) -> StoreResult<Value> {
        let doc = doc.as_object().cloned().unwrap();
        let mutation = Mutation::from_parts(query, ops).unwrap();
        apply(&doc, &mutation).map(Value::Object)
    }

    #[test]
    fn test_set_and_unset() {
        let doc = run(
            json!({"_id": "1", "title": "Tobi"}),
            json!({"_id": "1"}),
            json!({"$set": {"title": "Woot", "author.name": "T"}, "$unset": {"missing": 1}}),
        )
        .unwrap();
        assert_eq!(doc, json!({"_id": "1", "title": "Woot", "author": {"name": "T"}}));
    }

    #[test]
    fn test_inc() {
        let doc = run(json!({"n": 1, "f": 1.5}), json!({}), json!({"$inc": {"n": 2, "f": 1, "new": 3}})).unwrap();
        assert_eq!(doc, json!({"n": 3, "f": 2.5, "new": 3}));

        let err = run(json!({"s": "x"}), json!({}), json!({"$inc": {"s": 1}})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation { .. }));
    }

    #[test]
    fn test_array_operators() {
        let doc = run(
            json!({"likes": ["a"], "tags": ["x", "y", "z"]}),
            json!({}),
            json!({
                "$push": {"likes": "b"},
                "$pushAll": {"more": [1, 2]},
                "$addToSet": {"likes": {"$each": ["a", "c"]}},
                "$pop": {"tags": -1}
            }),
        )
        .unwrap();
        assert_eq!(doc, json!({"likes": ["a", "b", "c"], "tags": ["y", "z"], "more": [1, 2]}));

        let doc = run(
            json!({"items": [{"_id": 1, "t": "a"}, {"_id": 2, "t": "b"}], "n": [1, 2, 3, 2]}),
            json!({}),
            json!({"$pull": {"items": {"_id": 1}}, "$pullAll": {"n": [2, 3]}}),
        )
        .unwrap();
        assert_eq!(doc, json!({"items": [{"_id": 2, "t": "b"}], "n": [1]}));
    }

    #[test]
    fn test_rename() {
        let doc = run(json!({"a": 1}), json!({}), json!({"$rename": {"a": "b.c"}})).unwrap();
        assert_eq!(doc, json!({"b": {"c": 1}}));
    }

    #[test]
    fn test_positional_update() {
        let doc = run(
            json!({"_id": "1", "items": [{"_id": "x", "done": false}, {"_id": "y", "done": false}]}),
            json!({"_id": "1", "items._id": "y"}),
            json!({"$set": {"items.$.done": true}}),
        )
        .unwrap();
        assert_eq!(doc["items"][1]["done"], json!(true));
        assert_eq!(doc["items"][0]["done"], json!(false));
    }

    #[test]
    fn test_unsupported_operator() {
        let err = run(json!({}), json!({}), json!({"$bit": {"a": 1}})).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperator(op) if op == "$bit"));
    }
}
