//! Query planning and execution core for an embedded graph/document database.
//!
//! The crate plans SELECT, MATCH and TRAVERSE statements into chains of steps
//! and executes them as pull-based streams over the storage traits in
//! [`storage`].

#![warn(missing_docs)]

/// Execution configuration and its TOML/environment loading.
pub mod config;

/// Error type shared by planning and execution.
pub mod error;

/// Planners, steps, streams and plans.
pub mod query;

/// Collaborator traits and the in-memory database.
pub mod storage;

/// Record and cluster identifiers.
pub mod types;

pub use config::{ExecutionConfig, TimeoutStrategy};
pub use error::{QuarryError, Result};
pub use types::{ClusterId, Rid};
