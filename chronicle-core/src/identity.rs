//! Names and identifiers for aggregates, events and commands.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A name qualified with a version string.
///
/// Event and command definitions evolve; the version distinguishes otherwise
/// same-named definitions so that old serialized payloads remain readable.
/// The default version is `"0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionedName {
    name: String,
    version: String,
}

impl VersionedName {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// A versioned name with the default version, `"0"`.
    pub fn of(name: impl Into<String>) -> Self {
        Self::new(name, "0")
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The combined `name_version` form used as a serialized tag.
    #[must_use]
    pub fn formatted(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }
}

impl From<&str> for VersionedName {
    fn from(name: &str) -> Self {
        Self::of(name)
    }
}

impl fmt::Display for VersionedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.name, self.version)
    }
}

/// The identity of a single aggregate: its aggregate type paired with a
/// unique id.
///
/// Ids are only meaningful within their type; the same `Uuid` under two
/// different types names two different aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateId {
    aggregate_type: String,
    id: Uuid,
}

impl AggregateId {
    pub fn new(aggregate_type: impl Into<String>, id: Uuid) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            id,
        }
    }

    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.aggregate_type, self.id)
    }
}
