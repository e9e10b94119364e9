//! Version strings exchanged when a client connects to a server.
//!
//! Accepted forms are `MAJOR`, `MAJOR.MINOR` and `MAJOR.MINOR.PATCH`, each
//! optionally followed by a `-qualifier` (for example `0.3.0-SNAPSHOT`),
//! which is kept for display but ignored by comparisons. Minor and patch
//! may be given as `x`, which reads as 0.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub qualifier: Option<String>,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            qualifier: None,
        }
    }

    /// Version of this build.
    pub fn current() -> Self {
        // CARGO_PKG_VERSION is always MAJOR.MINOR.PATCH
        env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or_else(|_| Self::new(0, 0, 0))
    }

    fn triple(&self) -> (u32, u32, u32) {
        (self.major, self.minor, self.patch)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (numbers, qualifier) = match trimmed.split_once('-') {
            Some((n, q)) => (n, Some(q.to_string())),
            None => (trimmed, None),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(Error::InvalidVersion(trimmed.to_string()));
        }

        let mut numeric = [0u32; 3];
        for (i, (slot, part)) in numeric.iter_mut().zip(parts.iter()).enumerate() {
            // "1.x" style wildcards are allowed after the major component.
            if i > 0 && matches!(*part, "x" | "X" | "*") {
                continue;
            }
            *slot = part
                .parse()
                .map_err(|_| Error::InvalidVersion(trimmed.to_string()))?;
        }

        Ok(Self {
            major: numeric[0],
            minor: numeric[1],
            patch: numeric[2],
            qualifier,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(q) = &self.qualifier {
            write!(f, "-{}", q)?;
        }
        Ok(())
    }
}
