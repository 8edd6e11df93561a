use crate::error::{Result, SpanError};
use sqlparser::ast::{Ident, ObjectName};

pub(crate) fn ident_to_string(ident: &Ident) -> String {
    ident.value.clone()
}

pub(crate) fn object_name_parts(name: &ObjectName) -> Vec<String> {
    name.0.iter().map(ident_to_string).collect()
}

/// Identifier comparison under the statement's case-sensitivity policy.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NameMatcher {
    ignore_case: bool,
}

impl NameMatcher {
    pub(crate) fn new(ignore_case: bool) -> Self {
        Self { ignore_case }
    }

    pub(crate) fn eq(&self, a: &str, b: &str) -> bool {
        if !self.ignore_case {
            return a == b;
        }
        a.chars()
            .flat_map(char::to_lowercase)
            .eq(b.chars().flat_map(char::to_lowercase))
    }
}

/// A table reference split into `server.database.schema.table`; unspecified
/// parts are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TableName {
    pub(crate) server: String,
    pub(crate) database: String,
    pub(crate) schema: String,
    pub(crate) table: String,
}

impl TableName {
    pub(crate) fn from_object_name(name: &ObjectName) -> Result<Self> {
        let mut parts = object_name_parts(name);
        if parts.is_empty() || parts.len() > 4 {
            return Err(SpanError::unsupported(format!("object name {name}")));
        }
        let table = parts.pop().unwrap_or_default();
        let schema = parts.pop().unwrap_or_default();
        let database = parts.pop().unwrap_or_default();
        let server = parts.pop().unwrap_or_default();
        Ok(Self {
            server,
            database,
            schema,
            table,
        })
    }

    pub(crate) fn is_unqualified(&self) -> bool {
        self.server.is_empty() && self.database.is_empty() && self.schema.is_empty()
    }
}

/// The table part of a column or wildcard reference. Only the parts the user
/// wrote take part in matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Qualifier {
    pub(crate) database: String,
    pub(crate) schema: String,
    pub(crate) table: String,
}

impl Qualifier {
    /// Qualifier of `t.*`, `s.t.*` or `d.s.t.*`.
    pub(crate) fn from_object_name(name: &ObjectName) -> Result<Self> {
        let parsed = TableName::from_object_name(name)?;
        if !parsed.server.is_empty() {
            return Err(SpanError::LinkedServerUnsupported(name.to_string()));
        }
        let qualifier = Self {
            database: parsed.database,
            schema: parsed.schema,
            table: parsed.table,
        };
        qualifier.validate()?;
        Ok(qualifier)
    }

    fn validate(&self) -> Result<()> {
        if !self.schema.is_empty() && self.table.is_empty() {
            return Err(SpanError::AmbiguousOrUnspecifiedQualifier(format!(
                "schema name {} is specified without table name",
                self.schema
            )));
        }
        if !self.database.is_empty() && self.schema.is_empty() {
            return Err(SpanError::AmbiguousOrUnspecifiedQualifier(format!(
                "database name {} is specified without schema name",
                self.database
            )));
        }
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.database.is_empty() && self.schema.is_empty() && self.table.is_empty()
    }

    pub(crate) fn matches(&self, names: NameMatcher, database: &str, schema: &str, table: &str) -> bool {
        (self.database.is_empty() || names.eq(&self.database, database))
            && (self.schema.is_empty() || names.eq(&self.schema, schema))
            && (self.table.is_empty() || names.eq(&self.table, table))
    }
}

/// A column reference `[[[database.]schema.]table.]column`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ColumnPath {
    pub(crate) qualifier: Qualifier,
    pub(crate) column: String,
}

impl ColumnPath {
    pub(crate) fn from_idents(idents: &[Ident]) -> Result<Self> {
        let mut parts: Vec<String> = idents.iter().map(ident_to_string).collect();
        match parts.len() {
            1..=4 => {}
            5 => {
                let rendered = parts.join(".");
                return Err(SpanError::LinkedServerUnsupported(rendered));
            }
            _ => {
                return Err(SpanError::unsupported(format!(
                    "column reference {}",
                    parts.join(".")
                )))
            }
        }
        let column = parts.pop().unwrap_or_default();
        let table = parts.pop().unwrap_or_default();
        let schema = parts.pop().unwrap_or_default();
        let database = parts.pop().unwrap_or_default();
        let path = Self {
            qualifier: Qualifier {
                database,
                schema,
                table,
            },
            column,
        };
        path.validate()?;
        Ok(path)
    }

    fn validate(&self) -> Result<()> {
        if self.column.is_empty() {
            if self.qualifier.is_empty() {
                return Err(SpanError::AmbiguousOrUnspecifiedQualifier(
                    "no object name is specified".to_string(),
                ));
            }
            return Err(SpanError::AmbiguousOrUnspecifiedQualifier(format!(
                "table name {} is specified without column name",
                self.qualifier.table
            )));
        }
        self.qualifier.validate()
    }
}
