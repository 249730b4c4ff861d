//! File discovery and file-name conventions.
//!
//! Collection files are named `<prefix>__<table>__<collection>.log`; the
//! table name is the second `__`-separated field of the file name.

use snafu::prelude::*;
use std::path::{Path, PathBuf};

use crate::error::{InvalidPatternSnafu, SourceError, UnreadableSnafu};

/// Separator between the fields of generated file names.
pub const FIELD_DELIMITER: &str = "__";

/// Position of the table (or view) name among the delimited fields.
const NAME_FIELD: usize = 1;

/// Prefix of the files written by the collection scripts.
pub const COLLECTION_PREFIX: &str = "opdb";

/// Prefix of consolidated files.
pub const CONSOLIDATED_PREFIX: &str = "opalldb";

/// Collection id selecting consolidated files.
pub const CONSOLIDATED_SUFFIX: &str = "consolidate";

/// Build a glob pattern rooted at `dir`, escaping glob metacharacters in the
/// directory itself.
pub fn pattern_in(dir: &Path, file_pattern: &str) -> String {
    let dir = dir.to_string_lossy();
    if dir.is_empty() {
        return file_pattern.to_string();
    }
    let escaped = glob::Pattern::escape(&dir);
    if escaped.ends_with('/') {
        format!("{escaped}{file_pattern}")
    } else {
        format!("{escaped}/{file_pattern}")
    }
}

/// List regular files matching `pattern`, in the glob's lexicographic order.
pub fn find_files(pattern: &str) -> Result<Vec<PathBuf>, SourceError> {
    let mut files = Vec::new();
    for entry in glob::glob(pattern).context(InvalidPatternSnafu { pattern })? {
        let path = entry.context(UnreadableSnafu)?;
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

/// Pattern selecting one collection's files (or consolidated files).
pub fn import_pattern(files_location: &Path, collection_id: &str) -> String {
    pattern_in(files_location, &format!("*{collection_id}.log"))
}

/// Pattern selecting every collection file that may belong to `table`.
pub fn collection_pattern(files_location: &Path, table: &str) -> String {
    pattern_in(
        files_location,
        &format!("{COLLECTION_PREFIX}*{table}*.log"),
    )
}

/// Path of the consolidated file for `table`.
pub fn consolidated_path(files_location: &Path, table: &str) -> PathBuf {
    files_location.join(format!(
        "{CONSOLIDATED_PREFIX}{FIELD_DELIMITER}{table}{FIELD_DELIMITER}{CONSOLIDATED_SUFFIX}.log"
    ))
}

/// Table name carried by a file name, if it follows the convention.
///
/// Only the final path component is inspected so directories containing the
/// delimiter do not shift the fields.
pub fn table_name(path: &Path) -> Option<&str> {
    path.file_name()?
        .to_str()?
        .split(FIELD_DELIMITER)
        .nth(NAME_FIELD)
        .filter(|name| !name.is_empty())
}

/// View name carried by a template file name (`.sql` extension removed).
pub fn view_name(path: &Path) -> Option<&str> {
    let name = table_name(path)?;
    let name = name.strip_suffix(".sql").unwrap_or(name);
    (!name.is_empty()).then_some(name)
}
