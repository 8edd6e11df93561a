use sqlparser::parser::ParserError;
use thiserror::Error;

/// Errors raised while computing a query span.
///
/// Any of these means the sensitivity of the statement's output could not be
/// determined; callers must not treat a failed evaluation as "not sensitive".
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpanError {
    #[error("failed to parse statement: {0}")]
    Parse(#[from] ParserError),

    #[error("expecting 1 statement, but got {0}")]
    StatementCount(usize),

    #[error("{}", resource_not_found(.database, .schema, .table, .column.as_deref()))]
    ResourceNotFound {
        database: String,
        schema: String,
        table: String,
        column: Option<String>,
    },

    #[error("linked server is not supported yet, but found {0:?}")]
    LinkedServerUnsupported(String),

    #[error("{context}: expected {expected} columns, but found {found}")]
    ColumnCountMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("{0}")]
    AmbiguousOrUnspecifiedQualifier(String),

    #[error("cannot access {user} and {system} at the same time")]
    MixedSystemUserAccess { user: String, system: String },

    #[error("query nesting exceeds the maximum depth of {limit}")]
    NestingTooDeep { limit: usize },

    #[error("{0} is not supported yet")]
    UnsupportedConstruct(String),

    #[error("recursive CTE {cte:?} did not converge after {iterations} iterations")]
    RecursionDidNotConverge { cte: String, iterations: usize },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SpanError>;

impl SpanError {
    pub(crate) fn table_not_found(database: &str, schema: &str, table: &str) -> Self {
        SpanError::ResourceNotFound {
            database: database.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
            column: None,
        }
    }

    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        SpanError::UnsupportedConstruct(what.into())
    }
}

fn resource_not_found(database: &str, schema: &str, table: &str, column: Option<&str>) -> String {
    match column {
        Some(column) => format!(
            "no matching column {:?}.{:?}.{:?}.{:?}",
            database, schema, table, column
        ),
        None => format!(
            "table {:?}.{:?}.{:?} not found",
            database, schema, table
        ),
    }
}
