//! Tributary Core
//!
//! Shared building blocks for the Tributary control plane: the command record
//! that travels through the replicated log, the descriptors that make up a
//! node's applied metadata, and the layered configuration model consulted
//! whenever a statement is applied.
//!
//! ## Modules
//!
//! - [`record`]: `CommandRecord`, `PendingCommand` and deterministic `StatementId`s
//! - [`schema`]: column types, entity and query descriptors, result rows
//! - [`config`]: property registry and the defaults → server → session scope chain
//! - [`version`]: version strings exchanged during client/server negotiation
//!
//! All fallible operations return [`Result<T>`], aliased to `Result<T, Error>`.

pub mod config;
pub mod error;
pub mod record;
pub mod schema;
pub mod version;

pub use config::{
    PropertyDef, PropertyKind, PropertyListing, PropertyValue, Scope, ServerConfig, SessionConfig,
    SetOutcome, UnsetOutcome,
};
pub use error::{Error, Result};
pub use record::{now_ms, CommandRecord, PendingCommand, StatementId};
pub use schema::{
    Column, ColumnType, EntityDescriptor, EntityKind, QueryDescriptor, QueryStatus,
    RegisteredTopic, Row, SerializationFormat,
};
pub use version::Version;
