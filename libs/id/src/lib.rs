//! # testgrid-id
//!
//! Stable ID types, parsing, and validation for the testgrid platform.
//!
//! ## Design Principles
//!
//! - IDs are stable; display names are user-controlled labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed to prevent mixing different resource types
//!
//! ## ID Kinds
//!
//! - **Name-backed IDs** (`EnvironmentId`, `MachineId`): immutable strings
//!   assigned when a specification or machine is registered. Two IDs are
//!   equal iff their underlying strings are equal; ordering is lexicographic.
//! - **Run IDs** (`RunId`): prefixed ULIDs (`run_01HV4Z2WQXKJNM8GPQY6VBKC3D`),
//!   time-ordered, generated once per test activation for correlation.
//! - **Test IDs** (`TestId`): plain integer keys assigned by the persistence
//!   layer when a test suite is registered.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
