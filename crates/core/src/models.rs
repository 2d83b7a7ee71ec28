//! Shared data types that cross module boundaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An author identity used for resolution commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { name: name.into(), email: email.into() }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// A commit written by the finalizer. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    /// SHA of the new commit.
    pub id: String,
    /// Parent SHAs, in order.
    pub parents: Vec<String>,
    pub author: Identity,
    pub message: String,
    /// Whether the tip commit was rewritten instead of appended to.
    pub amend: bool,
    pub created_at: DateTime<Utc>,
}
