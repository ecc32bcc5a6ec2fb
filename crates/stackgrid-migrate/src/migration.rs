//! Migration model.

use crate::error::MigrateError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Timestamp-encoded version, e.g. `20240105120000`.
    pub version: i64,
    pub name: String,
    pub query: String,
}

impl Migration {
    /// Build from a `<version>_<name>.sql` file name and its contents.
    pub fn from_file(file_name: &str, query: String) -> Result<Self, MigrateError> {
        let invalid = || MigrateError::InvalidFileName(file_name.to_string());
        let stem = file_name.strip_suffix(".sql").ok_or_else(invalid)?;
        let (version, name) = stem.split_once('_').unwrap_or((stem, ""));
        let version = version.parse::<i64>().map_err(|_| invalid())?;
        Ok(Self {
            version,
            name: name.to_string(),
            query,
        })
    }
}

/// Migrations sorted ascending by version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { migrations }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn versions(&self) -> Vec<i64> {
        self.migrations.iter().map(|m| m.version).collect()
    }
}

/// Ledger table names, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationTables {
    pub primary: &'static str,
    pub legacy: &'static str,
}

impl MigrationTables {
    pub fn in_order(&self) -> [&'static str; 2] {
        [self.primary, self.legacy]
    }
}

pub const TENANT_TABLES: MigrationTables = MigrationTables {
    primary: "_stackgrid.schema_migrations",
    legacy: "public.schema_migrations",
};

pub const VAPI_TABLES: MigrationTables = MigrationTables {
    primary: "_stackgrid.vapi_migrations",
    legacy: "public.vapi_migrations",
};

/// What a migration set belongs to, which decides its ledger key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationScope {
    /// Platform migrations, keyed by version.
    Tenant,
    /// A VAPI package's schema, keyed by (version, package id).
    Vapi { package_id: String },
}

impl MigrationScope {
    pub fn tables(&self) -> MigrationTables {
        match self {
            MigrationScope::Tenant => TENANT_TABLES,
            MigrationScope::Vapi { .. } => VAPI_TABLES,
        }
    }

    pub fn package_id(&self) -> Option<&str> {
        match self {
            MigrationScope::Tenant => None,
            MigrationScope::Vapi { package_id } => Some(package_id),
        }
    }
}

impl std::fmt::Display for MigrationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationScope::Tenant => f.write_str("tenant"),
            MigrationScope::Vapi { package_id } => write!(f, "vapi:{package_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_names() {
        let m = Migration::from_file("20240105120000_create_items.sql", "select 1".into()).unwrap();
        assert_eq!(m.version, 20240105120000);
        assert_eq!(m.name, "create_items");

        let bare = Migration::from_file("7.sql", String::new()).unwrap();
        assert_eq!(bare.version, 7);
        assert_eq!(bare.name, "");

        assert!(Migration::from_file("create_items.sql", String::new()).is_err());
        assert!(Migration::from_file("1_a.txt", String::new()).is_err());
    }

    #[test]
    fn set_sorts_ascending() {
        let set = MigrationSet::new(vec![
            Migration::from_file("3_c.sql", String::new()).unwrap(),
            Migration::from_file("1_a.sql", String::new()).unwrap(),
            Migration::from_file("2_b.sql", String::new()).unwrap(),
        ]);
        assert_eq!(set.versions(), vec![1, 2, 3]);
    }

    #[test]
    fn scope_selects_tables() {
        assert_eq!(MigrationScope::Tenant.tables(), TENANT_TABLES);
        let vapi = MigrationScope::Vapi {
            package_id: "pkg".into(),
        };
        assert_eq!(vapi.tables().primary, "_stackgrid.vapi_migrations");
        assert_eq!(vapi.package_id(), Some("pkg"));
        assert_eq!(vapi.to_string(), "vapi:pkg");
    }
}
