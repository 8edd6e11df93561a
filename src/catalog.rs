use crate::error::{Result, SpanError};
use crate::span::MaskingLevel;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Read-only view of the databases a statement may reference.
///
/// Implementations may be backed by a remote store; each evaluation calls
/// them synchronously and caches what it gets for the rest of the statement.
pub trait CatalogAccessor {
    fn list_database_names(&self) -> Result<Vec<String>>;

    /// `Ok(None)` when the database is unknown.
    fn get_database_metadata(&self, database: &str) -> Result<Option<Arc<DatabaseMetadata>>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub name: String,
    #[serde(default)]
    pub schemas: Vec<SchemaMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(default)]
    pub masking: MaskingLevel,
}

impl DatabaseMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schemas: Vec::new(),
        }
    }

    /// Adds a table, creating its schema on first use.
    pub fn with_table(mut self, schema: &str, table: &str, columns: &[(&str, MaskingLevel)]) -> Self {
        let table = TableMetadata {
            name: table.to_string(),
            columns: columns
                .iter()
                .map(|(name, masking)| ColumnMetadata {
                    name: name.to_string(),
                    masking: *masking,
                })
                .collect(),
        };
        match self.schemas.iter_mut().find(|s| s.name == schema) {
            Some(existing) => existing.tables.push(table),
            None => self.schemas.push(SchemaMetadata {
                name: schema.to_string(),
                tables: vec![table],
            }),
        }
        self
    }

    pub fn list_schema_names(&self) -> Vec<&str> {
        self.schemas.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn get_schema(&self, name: &str) -> Option<&SchemaMetadata> {
        self.schemas.iter().find(|s| s.name == name)
    }
}

impl SchemaMetadata {
    pub fn list_table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn get_table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.iter().find(|t| t.name == name)
    }
}

impl TableMetadata {
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }
}

/// Catalog held entirely in memory, loadable from TOML or JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryCatalog {
    #[serde(default)]
    databases: Vec<Arc<DatabaseMetadata>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, database: DatabaseMetadata) -> Self {
        self.databases.push(Arc::new(database));
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| SpanError::Catalog(e.to_string()))
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| SpanError::Catalog(e.to_string()))
    }

    /// Reads a catalog file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SpanError::Catalog(format!("failed to read {}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }
}

impl CatalogAccessor for InMemoryCatalog {
    fn list_database_names(&self) -> Result<Vec<String>> {
        Ok(self.databases.iter().map(|d| d.name.clone()).collect())
    }

    fn get_database_metadata(&self, database: &str) -> Result<Option<Arc<DatabaseMetadata>>> {
        Ok(self.databases.iter().find(|d| d.name == database).cloned())
    }
}

/// Per-statement memo of catalog lookups.
pub(crate) struct MetadataCache<'c> {
    catalog: &'c dyn CatalogAccessor,
    database_names: RefCell<Option<Arc<Vec<String>>>>,
    databases: RefCell<HashMap<String, Option<Arc<DatabaseMetadata>>>>,
}

impl<'c> MetadataCache<'c> {
    pub(crate) fn new(catalog: &'c dyn CatalogAccessor) -> Self {
        Self {
            catalog,
            database_names: RefCell::new(None),
            databases: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn database_names(&self) -> Result<Arc<Vec<String>>> {
        if let Some(names) = self.database_names.borrow().as_ref() {
            return Ok(names.clone());
        }
        let names = Arc::new(self.catalog.list_database_names()?);
        *self.database_names.borrow_mut() = Some(names.clone());
        Ok(names)
    }

    pub(crate) fn database(&self, name: &str) -> Result<Option<Arc<DatabaseMetadata>>> {
        if let Some(cached) = self.databases.borrow().get(name) {
            tracing::trace!(database = name, "catalog cache hit");
            return Ok(cached.clone());
        }
        let metadata = self.catalog.get_database_metadata(name)?;
        self.databases
            .borrow_mut()
            .insert(name.to_string(), metadata.clone());
        Ok(metadata)
    }
}
