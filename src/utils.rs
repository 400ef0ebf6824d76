//! Utility functions for path construction.

use std::path::{Path, PathBuf};

/// File name of the fall event database inside the data directory.
pub const DB_FILE_NAME: &str = "fall_events.db";

/// Path of the fall event database inside the given data directory.
///
/// # Examples
///
/// ```
/// # use std::path::PathBuf;
/// # use veille::utils::db_path;
/// assert_eq!(db_path("/var/lib/veille"), PathBuf::from("/var/lib/veille/fall_events.db"));
/// ```
pub fn db_path(data_dir: impl AsRef<Path>) -> PathBuf {
    data_dir.as_ref().join(DB_FILE_NAME)
}
