//! On-disk cluster layout contract.
//!
//! A cluster data directory looks like:
//!
//! ```text
//! <data_dir>/
//! ├─ EMBER_VERSION       # format version marker
//! ├─ emberdb.conf        # configuration (may be empty)
//! ├─ LOCK                # advisory lock for single-process access
//! ├─ base/<db>/          # one directory per database, one .tbl file per table
//! ├─ wal/archive/        # write-ahead-log area
//! └─ global, tmp, stat, snapshots, slots, notify
//! ```
//!
//! The names are part of the engine contract: `init_fresh` reproduces them
//! verbatim and the engine refuses to start against a directory without the
//! version marker.

use std::path::{Path, PathBuf};

/// Format version written to and expected in the version marker.
pub const FORMAT_VERSION: u32 = 3;

/// Version marker file name.
pub const VERSION_FILE: &str = "EMBER_VERSION";

/// Configuration file name.
pub const CONFIG_FILE: &str = "emberdb.conf";

/// Advisory lock file name.
pub const LOCK_FILE: &str = "LOCK";

/// Database the bootstrap procedure brings up with catalog edits enabled.
pub const SEED_DATABASE: &str = "seed";

/// Unmodifiable template database created by bootstrap.
pub const TEMPLATE_DATABASE: &str = "template";

/// Default connectable database created by bootstrap.
pub const DEFAULT_DATABASE: &str = "main";

/// Table-name prefix reserved for catalog tables.
pub const CATALOG_PREFIX: &str = "sys_";

/// File suffix of on-disk table files.
pub const TABLE_SUFFIX: &str = "tbl";

/// Fixed subdirectory skeleton of a cluster, in creation order.
pub const CLUSTER_SUBDIRS: &[&str] = &[
    "global",
    "wal",
    "wal/archive",
    "base",
    "base/seed",
    "tmp",
    "stat",
    "snapshots",
    "slots",
    "notify",
];

/// Path of the version marker inside `data_dir`.
#[must_use]
pub fn version_path(data_dir: &Path) -> PathBuf {
    data_dir.join(VERSION_FILE)
}

/// Path of the configuration file inside `data_dir`.
#[must_use]
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Path of the lock file inside `data_dir`.
#[must_use]
pub fn lock_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LOCK_FILE)
}

/// Directory holding the named database's table files.
#[must_use]
pub fn database_dir(data_dir: &Path, database: &str) -> PathBuf {
    data_dir.join("base").join(database)
}

/// Path of one table file inside a database directory.
#[must_use]
pub fn table_path(data_dir: &Path, database: &str, table: &str) -> PathBuf {
    database_dir(data_dir, database).join(format!("{table}.{TABLE_SUFFIX}"))
}

/// Whether `table` names a catalog table.
#[must_use]
pub fn is_catalog_table(table: &str) -> bool {
    table.starts_with(CATALOG_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_anchored() {
        let root = Path::new("/data");
        assert_eq!(version_path(root), Path::new("/data/EMBER_VERSION"));
        assert_eq!(
            table_path(root, "main", "users"),
            Path::new("/data/base/main/users.tbl")
        );
    }

    #[test]
    fn seed_database_is_in_skeleton() {
        assert!(CLUSTER_SUBDIRS.contains(&"base/seed"));
    }

    #[test]
    fn catalog_prefix() {
        assert!(is_catalog_table("sys_settings"));
        assert!(!is_catalog_table("users"));
    }
}
