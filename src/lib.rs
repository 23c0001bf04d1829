//! Event Schema Registry
//!
//! Records, versions and serves the column layout of every event table
//! materialized into the warehouse, and validates the structural changes
//! operators and the schema-suggestion pipeline propose.
//!
//! ## Features
//!
//! - **Append-only log**: every change is an immutable operation row
//! - **Replay**: current and historical schemas are rebuilt from the log
//! - **Pre-flight validation**: identifiers, types, key columns and the
//!   column ceiling are checked against the whole batch before writing
//! - **Optimistic concurrency**: racing writers are detected at commit,
//!   never silently merged
//!
//! ## Architecture
//!
//! ```text
//! SchemaService ── SchemaBackend
//!                      │
//!                 VersionStore ── operation log (SQLite)
//!                  │        │
//!             Validator   replay
//!                  │        │
//!               Schema ── Operation
//! ```

pub mod checksum;
pub mod config;
pub mod error;
pub mod operation;
pub mod replay;
pub mod schema;
pub mod service;
pub mod store;
pub mod validate;

pub use checksum::Checksum;
pub use config::RegistryConfig;
pub use error::{ErrorKind, RegistryError, Result};
pub use operation::{Action, ActionMetadata, Operation};
pub use schema::{ColumnDefinition, ColumnRename, Schema, UpdateSchemaRequest};
pub use service::{SchemaBackend, SchemaService};
pub use store::{VersionStore, VersionSummary};
pub use validate::Validator;
