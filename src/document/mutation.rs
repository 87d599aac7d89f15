//! Mutation records
//!
//! A mutation record is what the broker carries for every successful update:
//! a JSON array `[matchCriteria, operators]`, for example
//! `[{"_id": "42"}, {"$set": {"title": "Woot"}}]`.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Update operator of a single mutation entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Set,
    Unset,
    Inc,
    Push,
    PushAll,
    AddToSet,
    Pull,
    PullAll,
    Pop,
    Rename,
    Other(String),
}

impl Operator {
    pub fn parse(name: &str) -> Self {
        match name {
            "$set" => Self::Set,
            "$unset" => Self::Unset,
            "$inc" => Self::Inc,
            "$push" => Self::Push,
            "$pushAll" => Self::PushAll,
            "$addToSet" => Self::AddToSet,
            "$pull" => Self::Pull,
            "$pullAll" => Self::PullAll,
            "$pop" => Self::Pop,
            "$rename" => Self::Rename,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Set => "$set",
            Self::Unset => "$unset",
            Self::Inc => "$inc",
            Self::Push => "$push",
            Self::PushAll => "$pushAll",
            Self::AddToSet => "$addToSet",
            Self::Pull => "$pull",
            Self::PullAll => "$pullAll",
            Self::Pop => "$pop",
            Self::Rename => "$rename",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operator together with the `{path: value}` pairs it applies
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorEntry {
    pub operator: Operator,
    pub fields: Map<String, Value>,
}

impl OperatorEntry {
    pub fn new(operator: Operator, fields: Map<String, Value>) -> Self {
        Self { operator, fields }
    }
}

/// A document change as published on the broker, before projection
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Criteria identifying the changed document (and array elements)
    pub query: Map<String, Value>,
    /// Operators in publish order
    pub ops: Vec<OperatorEntry>,
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Mutation is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mutation must be a [query, operators] pair")]
    Shape,

    #[error("Operator {0} must map field paths to values")]
    Operator(String),
}

impl Mutation {
    /// Build a mutation from a match query and an operators document
    pub fn from_parts(query: Value, operators: Value) -> Result<Self, MutationError> {
        let query = match query {
            Value::Object(map) => map,
            _ => return Err(MutationError::Shape),
        };
        let operators = match operators {
            Value::Object(map) => map,
            _ => return Err(MutationError::Shape),
        };

        let mut ops = Vec::with_capacity(operators.len());
        for (name, fields) in operators {
            match fields {
                Value::Object(fields) => ops.push(OperatorEntry::new(Operator::parse(&name), fields)),
                _ => return Err(MutationError::Operator(name)),
            }
        }

        Ok(Self { query, ops })
    }

    pub fn from_value(value: Value) -> Result<Self, MutationError> {
        match value {
            Value::Array(mut pair) if pair.len() == 2 => {
                let operators = pair.pop().unwrap_or(Value::Null);
                let query = pair.pop().unwrap_or(Value::Null);
                Self::from_parts(query, operators)
            }
            _ => Err(MutationError::Shape),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MutationError> {
        Self::from_value(serde_json::from_str(raw)?)
    }

    /// The operators document (`{"$set": {...}, ...}`)
    pub fn operators_value(&self) -> Value {
        let mut operators = Map::new();
        for entry in &self.ops {
            match operators.get_mut(entry.operator.as_str()) {
                Some(Value::Object(existing)) => {
                    existing.extend(entry.fields.clone());
                }
                _ => {
                    operators.insert(
                        entry.operator.as_str().to_string(),
                        Value::Object(entry.fields.clone()),
                    );
                }
            }
        }
        Value::Object(operators)
    }

    /// Wire form `[query, operators]`
    pub fn to_value(&self) -> Value {
        Value::Array(vec![Value::Object(self.query.clone()), self.operators_value()])
    }

    pub fn is_empty(&self) -> bool {
        self.ops.iter().all(|entry| entry.fields.is_empty())
    }

    /// All field paths touched by the operators, in publish order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.ops
            .iter()
            .flat_map(|entry| entry.fields.keys().map(String::as_str))
    }
}
