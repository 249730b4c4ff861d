//! Collection log consolidation.
//!
//! Several assessment runs leave one file per table per collection in the
//! files location. Consolidation merges them into a single
//! `opalldb__<table>__consolidate.log` per table, keeping the two header
//! lines of the first file only.

use snafu::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::catalog::TableCatalog;
use crate::error::{
    ConsolidateError, CreateOutputSnafu, DiscoverySnafu, ReadSourceSnafu, RemoveExistingSnafu,
    UnexpectedFileNameSnafu, WriteOutputSnafu,
};
use crate::source;

/// Header lines at the top of every collection file.
pub const HEADER_LINES: usize = 2;

/// Totals of one consolidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidationStats {
    /// Tables that produced a consolidated file.
    pub tables_consolidated: usize,
    /// Collection files merged across all tables.
    pub files_merged: usize,
    /// Lines written to the consolidated files, headers included.
    pub lines_written: u64,
}

/// Merge every table's collection files found in `files_location`.
///
/// Tables are visited in catalog order. A table with no collection files
/// produces no output. A previous consolidated file is replaced, never
/// appended to.
pub fn consolidate_logs(
    files_location: &Path,
    catalog: &TableCatalog,
) -> Result<ConsolidationStats, ConsolidateError> {
    let mut stats = ConsolidationStats::default();

    for table in catalog.table_names() {
        let pattern = source::collection_pattern(files_location, table);
        let sources = table_sources(table, &pattern)?;

        if sources.is_empty() {
            debug!(table, pattern = %pattern, "No collection files for table");
            continue;
        }

        let output = source::consolidated_path(files_location, table);
        let lines = write_consolidated(&output, &sources)?;

        info!(
            table,
            files = sources.len(),
            lines,
            output = %output.display(),
            "Consolidated collection files"
        );

        stats.tables_consolidated += 1;
        stats.files_merged += sources.len();
        stats.lines_written += lines;
    }

    info!(
        tables = stats.tables_consolidated,
        files = stats.files_merged,
        location = %files_location.display(),
        "Consolidation complete"
    );

    Ok(stats)
}

/// Matched files that belong to `table`, in discovery order.
///
/// Every match must carry a table name. Matches naming a different table
/// (one table name contained in another) are left for that table.
fn table_sources(table: &str, pattern: &str) -> Result<Vec<PathBuf>, ConsolidateError> {
    let mut sources = Vec::new();
    for path in source::find_files(pattern).context(DiscoverySnafu)? {
        let name = source::table_name(&path).context(UnexpectedFileNameSnafu { path: &path })?;
        if name != table {
            debug!(table, other = name, path = %path.display(), "Skipping file of another table");
            continue;
        }
        sources.push(path);
    }
    Ok(sources)
}

fn write_consolidated(output: &Path, sources: &[PathBuf]) -> Result<u64, ConsolidateError> {
    match std::fs::remove_file(output) {
        Ok(()) => info!(
            path = %output.display(),
            "Consolidated file already exists, it is going to be overwritten"
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).context(RemoveExistingSnafu { path: output }),
    }

    let file = File::create(output).context(CreateOutputSnafu { path: output })?;
    let mut writer = BufWriter::new(file);

    let mut written = 0;
    for (index, source) in sources.iter().enumerate() {
        let skip = if index == 0 { 0 } else { HEADER_LINES };
        written += append_lines(source, skip, &mut writer, output)?;
    }

    writer
        .flush()
        .context(WriteOutputSnafu { path: output })?;
    Ok(written)
}

/// Copy `source` line by line after dropping its first `skip` lines.
///
/// Bytes are copied as-is; a final line without a newline gets one.
fn append_lines<W: Write>(
    source: &Path,
    skip: usize,
    writer: &mut W,
    output: &Path,
) -> Result<u64, ConsolidateError> {
    let file = File::open(source).context(ReadSourceSnafu { path: source })?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut seen = 0;
    let mut written = 0;

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .context(ReadSourceSnafu { path: source })?;
        if read == 0 {
            break;
        }

        seen += 1;
        if seen <= skip {
            continue;
        }

        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }
        writer
            .write_all(&line)
            .context(WriteOutputSnafu { path: output })?;
        written += 1;
    }

    Ok(written)
}
