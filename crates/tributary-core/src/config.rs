//! Layered Configuration
//!
//! Every recognized property is declared once in a fixed registry together
//! with its built-in default. Values are resolved through a scope chain:
//!
//! ```text
//! built-in defaults  <  server overrides  <  session overrides
//! ```
//!
//! The most specific scope that defines a property wins. `SET` only ever
//! writes the session scope and `UNSET` only ever removes from it, so the
//! server and default layers are read-only from a session's point of view.
//!
//! ## Aliases
//!
//! Client-facing shorthand names (`auto.offset.reset`, `application.id`, ...)
//! are accepted anywhere a property name is and are stored under their
//! canonical `streams.`-prefixed name.
//!
//! ## Sensitive properties
//!
//! Sensitive properties resolve normally but are listed without a value.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How long a submission waits for local application by default.
pub const COMMAND_WAIT_TIMEOUT_MS: &str = "command.wait.timeout.ms";
/// Row limit applied to client result streams (0 = unlimited).
pub const QUERY_ROW_LIMIT: &str = "query.row.limit";
/// Idle window after which a client result stream ends (0 = never).
pub const QUERY_IDLE_TIMEOUT_MS: &str = "query.idle.timeout.ms";
pub const SERVICE_ID: &str = "service.id";
pub const SINK_PARTITIONS: &str = "sink.partitions";
pub const SINK_REPLICAS: &str = "sink.replicas";
pub const AUTO_OFFSET_RESET: &str = "streams.auto.offset.reset";

/// Value domain of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Text,
    Integer,
    Boolean,
    OneOf(&'static [&'static str]),
}

impl PropertyKind {
    fn validate(&self, property: &str, value: &str) -> Result<()> {
        let invalid = |reason: String| Error::InvalidValue {
            property: property.to_string(),
            value: value.to_string(),
            reason,
        };
        match self {
            PropertyKind::Text => Ok(()),
            PropertyKind::Integer => value
                .parse::<u64>()
                .map(|_| ())
                .map_err(|_| invalid("expected a non-negative integer".to_string())),
            PropertyKind::Boolean => match value.to_lowercase().as_str() {
                "true" | "false" => Ok(()),
                _ => Err(invalid("expected true or false".to_string())),
            },
            PropertyKind::OneOf(choices) => {
                if choices.iter().any(|c| c.eq_ignore_ascii_case(value)) {
                    Ok(())
                } else {
                    Err(invalid(format!("expected one of {}", choices.join(", "))))
                }
            }
        }
    }
}

/// One entry of the property registry.
#[derive(Debug, Clone, Copy)]
pub struct PropertyDef {
    pub name: &'static str,
    pub default: &'static str,
    pub kind: PropertyKind,
    pub sensitive: bool,
    pub description: &'static str,
}

const fn def(
    name: &'static str,
    default: &'static str,
    kind: PropertyKind,
    description: &'static str,
) -> PropertyDef {
    PropertyDef {
        name,
        default,
        kind,
        sensitive: false,
        description,
    }
}

/// Registry of recognized properties, sorted by name.
static REGISTRY: &[PropertyDef] = &[
    def(
        COMMAND_WAIT_TIMEOUT_MS,
        "30000",
        PropertyKind::Integer,
        "Milliseconds a submission waits for local application before reporting a timeout",
    ),
    def(
        QUERY_IDLE_TIMEOUT_MS,
        "0",
        PropertyKind::Integer,
        "End a client result stream after this many idle milliseconds (0 disables)",
    ),
    def(
        QUERY_ROW_LIMIT,
        "0",
        PropertyKind::Integer,
        "End a client result stream after this many rows (0 disables)",
    ),
    def(
        SERVICE_ID,
        "default_",
        PropertyKind::Text,
        "Identifier of the cluster this node belongs to",
    ),
    def(
        SINK_PARTITIONS,
        "4",
        PropertyKind::Integer,
        "Partitions for topics created by CREATE ... AS SELECT",
    ),
    def(
        SINK_REPLICAS,
        "1",
        PropertyKind::Integer,
        "Replicas for topics created by CREATE ... AS SELECT",
    ),
    def(
        "sink.window.change.log.additional.retention.ms",
        "1000000",
        PropertyKind::Integer,
        "Extra retention for windowed changelog topics",
    ),
    PropertyDef {
        name: "ssl.keystore.password",
        default: "",
        kind: PropertyKind::Text,
        sensitive: true,
        description: "Keystore password used for TLS connections",
    },
    def(
        "streams.application.id",
        "",
        PropertyKind::Text,
        "Application id prefix for running queries",
    ),
    def(
        AUTO_OFFSET_RESET,
        "latest",
        PropertyKind::OneOf(&["earliest", "latest"]),
        "Where a new query starts reading its sources",
    ),
    def(
        "streams.consumer.max.poll.records",
        "500",
        PropertyKind::Integer,
        "Maximum records returned by a single source poll",
    ),
    def(
        "streams.enable.auto.commit",
        "true",
        PropertyKind::Boolean,
        "Commit source positions automatically",
    ),
    def(
        "streams.max.request.size",
        "1048576",
        PropertyKind::Integer,
        "Maximum size of a single sink write",
    ),
    def(
        "streams.num.stream.threads",
        "1",
        PropertyKind::Integer,
        "Worker threads per running query",
    ),
    def(
        "streams.producer.batch.size",
        "16384",
        PropertyKind::Integer,
        "Sink write batch size in bytes",
    ),
];

static ALIASES: &[(&str, &str)] = &[
    ("application.id", "streams.application.id"),
    ("auto.offset.reset", AUTO_OFFSET_RESET),
    ("consumer.max.poll.records", "streams.consumer.max.poll.records"),
    ("enable.auto.commit", "streams.enable.auto.commit"),
    ("max.request.size", "streams.max.request.size"),
    ("num.stream.threads", "streams.num.stream.threads"),
    ("producer.batch.size", "streams.producer.batch.size"),
];

/// All recognized properties in name order.
pub fn registry() -> &'static [PropertyDef] {
    REGISTRY
}

/// Look up a property by canonical name or alias.
pub fn lookup(name: &str) -> Result<&'static PropertyDef> {
    let normalized = name.trim().to_lowercase();
    let canonical = ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(normalized.as_str());
    REGISTRY
        .iter()
        .find(|d| d.name == canonical)
        .ok_or_else(|| Error::UnknownProperty(name.trim().to_string()))
}

/// Scope a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    Default,
    Server,
    Session,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Default => f.write_str(""),
            Scope::Server => f.write_str("SERVER"),
            Scope::Session => f.write_str("SESSION"),
        }
    }
}

/// A resolved value together with the scope that supplied it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyValue {
    pub scope: Scope,
    pub value: String,
}

impl PropertyValue {
    pub fn as_u64(&self) -> Option<u64> {
        self.value.parse().ok()
    }
}

/// One row of `list()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyListing {
    pub name: String,
    pub scope: Scope,
    /// `None` for sensitive properties.
    pub value: Option<String>,
}

/// Server-wide overrides on top of the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    overrides: BTreeMap<String, String>,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs, validating each one.
    pub fn from_overrides<I, K, V>(overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::new();
        for (name, value) in overrides {
            let def = lookup(name.as_ref())?;
            let value = value.into();
            def.kind.validate(def.name, &value)?;
            config.overrides.insert(def.name.to_string(), value);
        }
        Ok(config)
    }

    pub fn overrides(&self) -> &BTreeMap<String, String> {
        &self.overrides
    }

    /// Resolve without any session scope.
    pub fn resolve(&self, name: &str) -> Result<PropertyValue> {
        self.resolve_with(&BTreeMap::new(), name)
    }

    /// Resolve through the full chain with `session` as the most specific scope.
    ///
    /// The applier calls this with the overrides carried by a command record so
    /// that every node resolves the submitting session's configuration.
    pub fn resolve_with(
        &self,
        session: &BTreeMap<String, String>,
        name: &str,
    ) -> Result<PropertyValue> {
        let def = lookup(name)?;
        Ok(self.resolve_def(session, def))
    }

    /// Integer-valued convenience over [`resolve_with`](Self::resolve_with).
    pub fn resolve_u64_with(&self, session: &BTreeMap<String, String>, name: &str) -> Result<u64> {
        let resolved = self.resolve_with(session, name)?;
        resolved.as_u64().ok_or_else(|| Error::InvalidValue {
            property: name.to_string(),
            value: resolved.value.clone(),
            reason: "expected a non-negative integer".to_string(),
        })
    }

    fn resolve_def(&self, session: &BTreeMap<String, String>, def: &PropertyDef) -> PropertyValue {
        if let Some(value) = session.get(def.name) {
            return PropertyValue {
                scope: Scope::Session,
                value: value.clone(),
            };
        }
        if let Some(value) = self.overrides.get(def.name) {
            return PropertyValue {
                scope: Scope::Server,
                value: value.clone(),
            };
        }
        PropertyValue {
            scope: Scope::Default,
            value: def.default.to_string(),
        }
    }

    fn list_with(&self, session: &BTreeMap<String, String>) -> Vec<PropertyListing> {
        let mut listing: Vec<PropertyListing> = REGISTRY
            .iter()
            .map(|def| {
                let resolved = self.resolve_def(session, def);
                PropertyListing {
                    name: def.name.to_string(),
                    scope: resolved.scope,
                    value: if def.sensitive {
                        None
                    } else {
                        Some(resolved.value)
                    },
                }
            })
            .collect();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        listing
    }
}

/// Result of `SET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    /// No session override existed; `shadowed` is the value that was in effect.
    NewlySet {
        property: String,
        value: String,
        shadowed: PropertyValue,
    },
    /// A session override was replaced.
    Changed {
        property: String,
        from: String,
        to: String,
    },
}

impl fmt::Display for SetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetOutcome::NewlySet {
                property, value, ..
            } => write!(
                f,
                "Successfully changed local property '{}' to '{}'. Use the UNSET command to revert your change.",
                property, value
            ),
            SetOutcome::Changed { property, from, to } => write!(
                f,
                "Successfully changed local property '{}' from '{}' to '{}'.",
                property, from, to
            ),
        }
    }
}

/// Result of `UNSET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsetOutcome {
    Reverted {
        property: String,
        removed: String,
        reverted_to: PropertyValue,
    },
    /// Nothing to undo; not an error.
    NotSet { property: String },
}

impl fmt::Display for UnsetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsetOutcome::Reverted {
                property, removed, ..
            } => write!(
                f,
                "Successfully unset local property '{}' (value was '{}').",
                property, removed
            ),
            UnsetOutcome::NotSet { property } => write!(
                f,
                "Local property '{}' was not set; nothing to unset.",
                property
            ),
        }
    }
}

/// The full scope chain as seen by one client session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    server: Arc<ServerConfig>,
    session: BTreeMap<String, String>,
}

impl SessionConfig {
    pub fn new(server: Arc<ServerConfig>) -> Self {
        Self {
            server,
            session: BTreeMap::new(),
        }
    }

    /// Effective value of `name`.
    pub fn resolve(&self, name: &str) -> Result<PropertyValue> {
        self.server.resolve_with(&self.session, name)
    }

    pub fn resolve_u64(&self, name: &str) -> Result<u64> {
        self.server.resolve_u64_with(&self.session, name)
    }

    /// Write a session-scope override.
    pub fn set(&mut self, name: &str, value: &str) -> Result<SetOutcome> {
        let def = lookup(name)?;
        def.kind.validate(def.name, value)?;

        // Messages echo the name as the user typed it; storage uses the canonical name.
        let shown = name.trim().to_string();
        let outcome = match self.session.get(def.name) {
            Some(previous) => SetOutcome::Changed {
                property: shown,
                from: previous.clone(),
                to: value.to_string(),
            },
            None => SetOutcome::NewlySet {
                property: shown,
                value: value.to_string(),
                shadowed: self.server.resolve_def(&self.session, def),
            },
        };
        self.session
            .insert(def.name.to_string(), value.to_string());
        Ok(outcome)
    }

    /// Remove the session-scope override, exposing the next scope down.
    pub fn unset(&mut self, name: &str) -> Result<UnsetOutcome> {
        let def = lookup(name)?;
        let shown = name.trim().to_string();
        match self.session.remove(def.name) {
            Some(removed) => Ok(UnsetOutcome::Reverted {
                property: shown,
                removed,
                reverted_to: self.server.resolve_def(&self.session, def),
            }),
            None => Ok(UnsetOutcome::NotSet { property: shown }),
        }
    }

    /// Every recognized property with its effective scope and value, sorted by name.
    pub fn list(&self) -> Vec<PropertyListing> {
        self.server.list_with(&self.session)
    }

    /// The session-scope layer, carried inside submitted command records.
    pub fn session_overrides(&self) -> &BTreeMap<String, String> {
        &self.session
    }

    pub fn server(&self) -> &Arc<ServerConfig> {
        &self.server
    }
}
