//! Document model
//!
//! - **types**: document identity and field projections
//! - **mutation**: mutation records as carried by the broker
//! - **projection**: the pure projection filter applied per subscriber
//!
//! # Example
//!
//! ```rust
//! use docfeed::document::{filter, Mutation, Projection};
//! use serde_json::json;
//!
//! let mutation = Mutation::from_parts(
//!     json!({"_id": "1"}),
//!     json!({"$set": {"a": 1, "c": 2}}),
//! ).unwrap();
//!
//! let visible = filter(&mutation, &Projection::include(["a", "b"]));
//! assert_eq!(visible[0].to_value(), json!([{"_id": "1"}, {"$set": {"a": 1}}]));
//! ```

pub mod mutation;
pub mod projection;
pub mod types;

pub use mutation::{Mutation, MutationError, Operator, OperatorEntry};
pub use projection::{filter, project_document};
pub use types::{DocumentId, DocumentRef, Projection, ProjectionError};
