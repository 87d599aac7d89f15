//! Document identity and field projections.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Identifier of a single document inside a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// `(collection, documentId)` pair owned by the document store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub collection: String,
    pub id: DocumentId,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: impl Into<DocumentId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Field projection restricting which paths a subscriber observes.
///
/// Paths are dotted (`author.name`) and act as prefixes: including `author`
/// makes `author.name` visible, excluding `author` hides it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    /// No restriction
    #[default]
    All,
    /// Only these paths (and `_id`, unless `hide_id`) are visible
    Include {
        fields: BTreeSet<String>,
        hide_id: bool,
    },
    /// Everything except these paths is visible
    Exclude(BTreeSet<String>),
}

/// How a path relates to the paths named by a projection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathRelation {
    /// The path lies inside (or equals) a named path
    Covered,
    /// The path is an ancestor of one or more named paths
    Ancestor,
    /// Unrelated to every named path
    Disjoint,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("Projection cannot mix inclusion and exclusion (field {0})")]
    Mixed(String),

    #[error("Invalid projection value for field {0}")]
    InvalidValue(String),

    #[error("Projection must be a string, array or object")]
    InvalidShape,
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Include {
            fields: fields.into_iter().map(Into::into).collect(),
            hide_id: false,
        }
        .normalize()
    }

    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exclude(fields.into_iter().map(Into::into).collect()).normalize()
    }

    /// Parse the projection shapes accepted from route handlers and the
    /// side channel: `"a b -c"`, `["a", "b"]` or `{"a": 1, "c": 0}`.
    pub fn from_value(value: &Value) -> Result<Self, ProjectionError> {
        let mut included = BTreeSet::new();
        let mut excluded = BTreeSet::new();

        let mut push = |field: &str, keep: bool| {
            if field.is_empty() {
                return;
            }
            if keep {
                included.insert(field.to_string());
            } else {
                excluded.insert(field.to_string());
            }
        };

        match value {
            Value::Null => return Ok(Self::All),
            Value::String(s) => {
                for token in s.split_whitespace() {
                    match token.strip_prefix('-') {
                        Some(field) => push(field, false),
                        None => push(token.trim_start_matches('+'), true),
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    match item.as_str() {
                        Some(field) => match field.strip_prefix('-') {
                            Some(field) => push(field, false),
                            None => push(field, true),
                        },
                        None => return Err(ProjectionError::InvalidShape),
                    }
                }
            }
            Value::Object(map) => {
                for (field, flag) in map {
                    let keep = match flag {
                        Value::Bool(b) => *b,
                        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
                        _ => return Err(ProjectionError::InvalidValue(field.clone())),
                    };
                    push(field, keep);
                }
            }
            _ => return Err(ProjectionError::InvalidShape),
        }

        if included.is_empty() {
            return Ok(Self::Exclude(excluded).normalize());
        }

        // `_id` is the only field that may be excluded from an inclusive set
        let hide_id = excluded.remove("_id");
        if let Some(field) = excluded.into_iter().next() {
            return Err(ProjectionError::Mixed(field));
        }

        Ok(Self::Include {
            fields: included,
            hide_id,
        }
        .normalize())
    }

    /// Empty sets collapse to [`Projection::All`]
    fn normalize(self) -> Self {
        match &self {
            Self::Include { fields, .. } if fields.is_empty() => Self::All,
            Self::Exclude(fields) if fields.is_empty() => Self::All,
            _ => self,
        }
    }

    /// Object form accepted back by [`Projection::from_value`]
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        match self {
            Self::All => {}
            Self::Include { fields, hide_id } => {
                for field in fields {
                    map.insert(field.clone(), Value::from(1));
                }
                if *hide_id {
                    map.insert("_id".to_string(), Value::from(0));
                }
            }
            Self::Exclude(fields) => {
                for field in fields {
                    map.insert(field.clone(), Value::from(0));
                }
            }
        }
        Value::Object(map)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Whether the `_id` field is visible
    pub fn shows_id(&self) -> bool {
        match self {
            Self::All => true,
            Self::Include { fields, hide_id } => !*hide_id || fields.contains("_id"),
            Self::Exclude(fields) => !fields.contains("_id"),
        }
    }

    /// Whether a mutation on `path` is visible in full
    pub fn allows(&self, path: &str) -> bool {
        match self {
            Self::All => true,
            Self::Include { fields, .. } => relation(fields, path) == PathRelation::Covered,
            Self::Exclude(fields) => relation(fields, path) != PathRelation::Covered,
        }
    }

    pub(crate) fn relation(&self, path: &str) -> PathRelation {
        match self {
            Self::All => PathRelation::Disjoint,
            Self::Include { fields, .. } | Self::Exclude(fields) => relation(fields, path),
        }
    }

    /// Named paths strictly below `path`, relative to it
    pub(crate) fn descendants(&self, path: &str) -> Vec<String> {
        let fields = match self {
            Self::All => return Vec::new(),
            Self::Include { fields, .. } | Self::Exclude(fields) => fields,
        };
        let prefix = format!("{}.", strip_positional(path));
        fields
            .iter()
            .filter_map(|f| f.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

fn relation(fields: &BTreeSet<String>, path: &str) -> PathRelation {
    let path = strip_positional(path);
    let mut ancestor = false;
    for field in fields {
        if is_prefix(field, &path) {
            return PathRelation::Covered;
        }
        if is_prefix(&path, field) {
            ancestor = true;
        }
    }
    if ancestor {
        PathRelation::Ancestor
    } else {
        PathRelation::Disjoint
    }
}

/// `prefix` equals `path` or names one of its ancestors
fn is_prefix(prefix: &str, path: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'.')
}

/// Positional and numeric segments address array elements, not fields:
/// `items.$.text` and `items.3.text` are both judged as `items.text`.
pub(crate) fn strip_positional(path: &str) -> String {
    path.split('.')
        .filter(|seg| *seg != "$" && seg.parse::<usize>().is_err())
        .collect::<Vec<_>>()
        .join(".")
}
