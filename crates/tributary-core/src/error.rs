//! Error Types for Tributary Core
//!
//! ## Error Categories
//!
//! ### Configuration Errors
//! - `UnknownProperty`: SET/UNSET/resolve named a property the registry does not define
//! - `InvalidValue`: the value does not parse as the property's declared type
//!
//! ### Negotiation Errors
//! - `InvalidVersion`: a version string could not be parsed
//!
//! ### Schema Errors
//! - `InvalidColumnType`: a column type declaration is not recognised

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Not a recognized property: '{0}'")]
    UnknownProperty(String),

    #[error("Invalid value '{value}' for property '{property}': {reason}")]
    InvalidValue {
        property: String,
        value: String,
        reason: String,
    },

    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    #[error("Unknown column type: {0}")]
    InvalidColumnType(String),
}

pub type Result<T> = std::result::Result<T, Error>;
