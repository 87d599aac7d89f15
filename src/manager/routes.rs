//! Route table
//!
//! Maps the `route` a connection asks for to handlers that decide which
//! documents to expose to it. Patterns are paths with named captures:
//!
//! | pattern           | matches                 | params                 |
//! |-------------------|-------------------------|------------------------|
//! | `/posts/:id`      | `/posts/42`             | `id = 42`              |
//! | `/users/:id/:tab?`| `/users/7`, `/users/7/a`| `id`, optional `tab`   |
//! | `/files/*`        | `/files/a/b`            | `0 = a/b`              |
//!
//! Matching is exact and case-sensitive.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::subscription::Exposure;

/// What a route handler learns about the connection it serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub connection_id: String,
    pub route: String,
    pub params: HashMap<String, String>,
}

impl RouteRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Decides which documents a matched connection receives
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, request: &RouteRequest) -> Result<Vec<Exposure>, RouteError>;
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Invalid route pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Route handler failed: {0}")]
    Handler(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParamKey {
    name: String,
    optional: bool,
}

struct Route {
    pattern: String,
    matcher: Regex,
    keys: Vec<ParamKey>,
    handler: Arc<dyn RouteHandler>,
}

#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; re-registering a pattern replaces its handler
    pub fn insert(&mut self, pattern: &str, handler: Arc<dyn RouteHandler>) -> Result<(), RouteError> {
        let (matcher, keys) = compile(pattern)?;

        if let Some(route) = self.routes.iter_mut().find(|r| r.pattern == pattern) {
            route.handler = handler;
            return Ok(());
        }
        self.routes.push(Route {
            pattern: pattern.to_string(),
            matcher,
            keys,
            handler,
        });
        Ok(())
    }

    /// Every route matching `path`, in registration order, with its params
    pub fn matches(&self, path: &str) -> Vec<(Arc<dyn RouteHandler>, HashMap<String, String>)> {
        self.routes
            .iter()
            .filter_map(|route| {
                let captures = route.matcher.captures(path)?;
                let mut params = HashMap::new();
                for (index, key) in route.keys.iter().enumerate() {
                    match captures.get(index + 1) {
                        Some(value) => {
                            params.insert(key.name.clone(), value.as_str().to_string());
                        }
                        None if key.optional => {}
                        None => return None,
                    }
                }
                Some((Arc::clone(&route.handler), params))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Translate a route pattern into an anchored regex plus its capture keys
fn compile(pattern: &str) -> Result<(Regex, Vec<ParamKey>), RouteError> {
    let invalid = |source| RouteError::Pattern {
        pattern: pattern.to_string(),
        source,
    };
    let tokens = Regex::new(r"(/)?:(\w+)(\?)?|\*").map_err(invalid)?;

    let mut keys = Vec::new();
    let mut source = String::from("^");
    let mut last = 0;
    let mut wildcards = 0;

    for captures in tokens.captures_iter(pattern) {
        let Some(token) = captures.get(0) else {
            continue;
        };
        source.push_str(&regex::escape(&pattern[last..token.start()]));
        last = token.end();

        let Some(name) = captures.get(2) else {
            keys.push(ParamKey {
                name: wildcards.to_string(),
                optional: true,
            });
            wildcards += 1;
            source.push_str("(.*)");
            continue;
        };

        let slash = if captures.get(1).is_some() { "/" } else { "" };
        let optional = captures.get(3).is_some();
        keys.push(ParamKey {
            name: name.as_str().to_string(),
            optional,
        });

        if optional {
            source.push_str(&format!("(?:{}([^/]+?))?", slash));
        } else {
            source.push_str(&format!("{}([^/]+?)", slash));
        }
    }

    source.push_str(&regex::escape(&pattern[last..]));
    source.push('$');

    let matcher = Regex::new(&source).map_err(invalid)?;
    Ok((matcher, keys))
}
