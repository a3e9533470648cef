//! Provenance descriptors attached to sweep artefacts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic version describing the schema of serialized payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Major version incremented for breaking changes.
    pub major: u32,
    /// Minor version incremented for additive changes.
    pub minor: u32,
    /// Patch version incremented for bug fixes and documentation updates.
    pub patch: u32,
}

impl SchemaVersion {
    /// Creates a new schema version descriptor.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for SchemaVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

/// Provenance information written alongside every sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SweepProvenance {
    /// Schema of the manifest and report payloads.
    pub schema_version: SchemaVersion,
    /// Hash of the effective base configuration.
    pub config_hash: String,
    /// Hash of the parameter document.
    pub parameters_hash: String,
    /// ISO-8601 timestamp recording when the sweep started.
    pub created_at: String,
    /// Version map for all tools involved in the sweep.
    pub tool_versions: BTreeMap<String, String>,
}
