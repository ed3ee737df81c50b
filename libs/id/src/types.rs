//! Typed ID definitions for all platform resources.

use crate::{define_name_id, define_ulid_id};

// =============================================================================
// Environments and Machines
// =============================================================================

define_name_id!(EnvironmentId);
define_name_id!(MachineId);

// =============================================================================
// Activation Runs
// =============================================================================

define_ulid_id!(RunId, "run");

// =============================================================================
// Tests
// =============================================================================

/// Test ID is a plain integer key assigned by the persistence layer,
/// not name- or ULID-based. Handled separately from the typed IDs above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestId(i64);

impl TestId {
    /// Creates a new TestId from an i64.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying i64 value.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for TestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TestId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TestId> for i64 {
    fn from(id: TestId) -> Self {
        id.0
    }
}

impl serde::Serialize for TestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for TestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = i64::deserialize(deserializer)?;
        Ok(Self(id))
    }
}

// =============================================================================
// Tests
// =============================================================================
