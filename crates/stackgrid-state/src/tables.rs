//! redb table definitions.
//!
//! Every table maps a string id to a JSON-serialized value.

use redb::TableDefinition;

/// Instances keyed by instance id.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Stacks keyed by stack id.
pub const STACKS: TableDefinition<&str, &[u8]> = TableDefinition::new("stacks");

/// VAPI packages keyed by package id.
pub const VAPI_PACKAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("vapi_packages");

/// VAPI releases keyed by release id.
pub const VAPI_RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("vapi_releases");
