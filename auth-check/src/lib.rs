//! Relationship-based permission check engine
//!
//! Answers "does subject S have relation R on object O" over a graph of
//! relation tuples, with:
//! - concurrent evaluation of the branches of a union, short-circuiting on the
//!   first positive answer
//! - cycle detection through a per-request registry of visited subject sets
//! - explanation trees recording the path that granted access
//! - cancellation and deadlines propagated to every running branch
//!
//! # Core Concepts
//!
//! - **Relation tuple**: `namespace:object#relation@subject`, stating that the
//!   subject has the relation on the object
//! - **Subject**: either a plain id (`alice`) or a subject set
//!   (`(default:group#member)`), the set of subjects having a relation on an object
//! - **Checkgroup**: aggregator of the sub-checks of one graph node
//!
//! # Example
//!
//! ```rust
//! use auth_check::{AuthorizationEngine, EngineConfig, RelationTuple};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = AuthorizationEngine::new(EngineConfig::default())?;
//!
//!     engine.write_tuple("default:doc1#viewer@(default:editors#member)".parse()?);
//!     engine.write_tuple("default:editors#member@alice".parse()?);
//!
//!     let request: RelationTuple = "default:doc1#viewer@alice".parse()?;
//!     assert!(engine.check(&request).await?);
//!
//!     Ok(())
//! }
//! ```

pub mod check;
pub mod checkgroup;
pub mod codec;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod expand;
pub mod graph;
pub mod models;
pub mod repository;
pub mod tree;

pub use check::CheckEngine;
pub use checkgroup::{CheckFn, CheckResult, Checkgroup, Edge, Membership};
pub use config::{CheckgroupKind, EngineConfig};
pub use context::CheckContext;
pub use engine::*;
pub use error::*;
pub use expand::ExpandEngine;
pub use models::*;
pub use repository::{EdgeExpander, EdgePage, InMemoryTupleStore};
pub use tree::{ExpandTree, NodeType, SubjectTree};
