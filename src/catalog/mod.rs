//! Table schema catalog.
//!
//! Maps every known table name to its ordered column list. The catalog is a
//! declarative YAML document; a default copy is embedded in the binary and
//! an operator can replace it with `--catalog <path>`.

use indexmap::IndexMap;
use serde::Deserialize;
use snafu::prelude::*;
use std::collections::HashSet;
use std::path::Path;

use crate::error::{
    CatalogError, CatalogParseSnafu, CatalogReadSnafu, DuplicateColumnSnafu, EmptyCatalogSnafu,
    EmptyTableSnafu,
};

/// Catalog shipped with the tool.
const EMBEDDED_CATALOG: &str = include_str!("tables.yaml");

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    tables: IndexMap<String, Vec<String>>,
}

/// Ordered column names of one table. Every column is loaded as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<String>,
}

impl TableSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Read-only mapping from table name to schema, in declaration order.
#[derive(Debug, Clone)]
pub struct TableCatalog {
    tables: IndexMap<String, TableSchema>,
}

impl TableCatalog {
    /// Load the catalog compiled into the binary.
    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_yaml(EMBEDDED_CATALOG)
    }

    /// Load a catalog from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).context(CatalogReadSnafu { path })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a catalog document.
    pub fn from_yaml(content: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument = serde_yaml::from_str(content).context(CatalogParseSnafu)?;
        ensure!(!document.tables.is_empty(), EmptyCatalogSnafu);

        let mut tables = IndexMap::with_capacity(document.tables.len());
        for (table, columns) in document.tables {
            ensure!(!columns.is_empty(), EmptyTableSnafu { table: &table });

            let mut seen = HashSet::with_capacity(columns.len());
            for column in &columns {
                ensure!(
                    seen.insert(column.as_str()),
                    DuplicateColumnSnafu {
                        table: &table,
                        column,
                    }
                );
            }

            tables.insert(table, TableSchema::new(columns));
        }

        Ok(Self { tables })
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Table names in declaration order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TableSchema)> {
        self.tables.iter().map(|(name, schema)| (name.as_str(), schema))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
