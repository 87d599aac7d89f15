//! Projection filter
//!
//! Reduces a raw [`Mutation`] to what a subscriber with a given
//! [`Projection`] may observe, and projects document snapshots the same way.
//! Everything here is pure.

use serde_json::{Map, Value};

use super::mutation::{Mutation, Operator, OperatorEntry};
use super::types::{strip_positional, PathRelation, Projection};

/// Filter a mutation through a projection.
///
/// Returns the records to emit, in order. An empty vector means nothing in
/// the mutation is visible and no event must be sent. Bulk array operators
/// are expanded to one record per element; the non-bulk remainder of the
/// mutation comes first as a single record.
pub fn filter(mutation: &Mutation, projection: &Projection) -> Vec<Mutation> {
    let query = filter_query(mutation, projection);

    let mut combined: Vec<OperatorEntry> = Vec::new();
    let mut expanded: Vec<Mutation> = Vec::new();

    for entry in &mutation.ops {
        for (path, value) in &entry.fields {
            if let Some((single, elements)) = expand_bulk(&entry.operator, value) {
                for element in elements {
                    if let Some((op, path, value)) = filter_field(&single, path, element, projection)
                    {
                        let mut fields = Map::new();
                        fields.insert(path, value);
                        expanded.push(Mutation {
                            query: query.clone(),
                            ops: vec![OperatorEntry::new(op, fields)],
                        });
                    }
                }
                continue;
            }

            if let Some((op, path, value)) = filter_field(&entry.operator, path, value, projection) {
                match combined.iter_mut().find(|e| e.operator == op) {
                    Some(existing) => {
                        existing.fields.insert(path, value);
                    }
                    None => {
                        let mut fields = Map::new();
                        fields.insert(path, value);
                        combined.push(OperatorEntry::new(op, fields));
                    }
                }
            }
        }
    }

    let mut records = Vec::with_capacity(expanded.len() + 1);
    if !combined.is_empty() {
        records.push(Mutation {
            query,
            ops: combined,
        });
    }
    records.extend(expanded);
    records
}

/// Keep identifying and positional criteria, drop anything else not visible
fn filter_query(mutation: &Mutation, projection: &Projection) -> Map<String, Value> {
    if projection.is_all() {
        return mutation.query.clone();
    }

    let positional_roots: Vec<&str> = mutation
        .paths()
        .filter(|path| path.split('.').any(|seg| seg == "$"))
        .filter_map(|path| path.split('.').next())
        .collect();

    mutation
        .query
        .iter()
        .filter(|(key, _)| {
            let root = key.split('.').next().unwrap_or(key.as_str());
            key.as_str() == "_id" || positional_roots.contains(&root) || projection.allows(key)
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Split a bulk operator into its per-element form
fn expand_bulk<'a>(operator: &Operator, value: &'a Value) -> Option<(Operator, &'a [Value])> {
    let each = |v: &'a Value| -> Option<&'a [Value]> {
        v.as_object()
            .filter(|m| m.len() == 1)
            .and_then(|m| m.get("$each"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
    };

    match operator {
        Operator::PushAll => value.as_array().map(|a| (Operator::Push, a.as_slice())),
        Operator::PullAll => value.as_array().map(|a| (Operator::Pull, a.as_slice())),
        Operator::Push => each(value).map(|a| (Operator::Push, a)),
        Operator::AddToSet => each(value).map(|a| (Operator::AddToSet, a)),
        _ => None,
    }
}

fn filter_field(
    operator: &Operator,
    path: &str,
    value: &Value,
    projection: &Projection,
) -> Option<(Operator, String, Value)> {
    if projection.is_all() {
        return Some((operator.clone(), path.to_string(), value.clone()));
    }

    if *operator == Operator::Rename {
        let target = value.as_str()?;
        return match (projection.allows(path), projection.allows(target)) {
            (true, true) => Some((Operator::Rename, path.to_string(), value.clone())),
            (true, false) => Some((Operator::Unset, path.to_string(), Value::from(1))),
            _ => None,
        };
    }

    let include = matches!(projection, Projection::Include { .. });
    match projection.relation(path) {
        PathRelation::Covered if include => Some((operator.clone(), path.to_string(), value.clone())),
        PathRelation::Covered => None,
        PathRelation::Disjoint if include => None,
        PathRelation::Disjoint => Some((operator.clone(), path.to_string(), value.clone())),
        PathRelation::Ancestor => {
            let nested = projection.descendants(path);
            match operator {
                Operator::Set if include && !value.is_object() && !value.is_array() => {
                    Some((Operator::Unset, path.to_string(), Value::from(1)))
                }
                Operator::Set | Operator::Push | Operator::AddToSet | Operator::Other(_) => Some((
                    operator.clone(),
                    path.to_string(),
                    narrow(value, &nested, include),
                )),
                // an emptied condition would match every element
                Operator::Pull if value.is_object() => match narrow(value, &nested, include) {
                    Value::Object(fields) if fields.is_empty() => None,
                    narrowed => Some((Operator::Pull, path.to_string(), narrowed)),
                },
                _ => Some((operator.clone(), path.to_string(), value.clone())),
            }
        }
    }
}

/// Restrict a nested value to (`include`) or away from the relative paths
fn narrow(value: &Value, paths: &[String], include: bool) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                let covered = paths.iter().any(|p| p == key);
                let prefix = format!("{}.", key);
                let nested: Vec<String> = paths
                    .iter()
                    .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
                    .collect();

                if include {
                    if covered || key == "_id" {
                        out.insert(key.clone(), child.clone());
                    } else if !nested.is_empty() {
                        out.insert(key.clone(), narrow(child, &nested, true));
                    }
                } else if covered {
                    continue;
                } else if !nested.is_empty() {
                    out.insert(key.clone(), narrow(child, &nested, false));
                } else {
                    out.insert(key.clone(), child.clone());
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| narrow(v, paths, include)).collect()),
        other => other.clone(),
    }
}

/// Project a document snapshot. The result is always a fresh copy.
pub fn project_document(document: &Value, projection: &Projection) -> Value {
    let Value::Object(fields) = document else {
        return document.clone();
    };

    match projection {
        Projection::All => document.clone(),
        Projection::Include { fields: paths, .. } => {
            let mut paths: Vec<String> = paths.iter().map(|p| strip_positional(p)).collect();
            if projection.shows_id() {
                paths.push("_id".to_string());
            }
            let mut out = Map::new();
            for (key, child) in fields {
                let prefix = format!("{}.", key);
                let nested: Vec<String> = paths
                    .iter()
                    .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
                    .collect();
                if paths.iter().any(|p| p == key) {
                    out.insert(key.clone(), child.clone());
                } else if !nested.is_empty() {
                    out.insert(key.clone(), narrow(child, &nested, true));
                }
            }
            Value::Object(out)
        }
        Projection::Exclude(paths) => {
            let paths: Vec<String> = paths.iter().cloned().collect();
            narrow(document, &paths, false)
        }
    }
}
