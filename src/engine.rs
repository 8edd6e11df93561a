use crate::access;
use crate::catalog::CatalogAccessor;
use crate::dialect::SqlDialect;
use crate::error::{Result, SpanError};
use crate::extractor::{Extractor, Session};
use crate::names::NameMatcher;
use crate::registry::FunctionRegistry;
use crate::span::QuerySpan;
use sqlparser::ast::Statement;
use sqlparser::parser::Parser;
use tracing::debug;

/// Guards against pathological input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum nesting of query expressions (subqueries, derived tables, CTE bodies).
    pub max_nesting_depth: usize,
    /// Maximum rounds spent on one recursive CTE.
    pub max_fixed_point_iterations: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_nesting_depth: 40,
            max_fixed_point_iterations: 16,
        }
    }
}

/// Computes query spans for one SQL dialect.
///
/// The engine holds no per-statement state; one instance can serve any number
/// of statements, from any number of threads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpanEngine {
    pub dialect: SqlDialect,
    pub functions: FunctionRegistry,
    pub limits: Limits,
}

impl QuerySpanEngine {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// Splits a script into statements using the engine's dialect.
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>> {
        let dialect = self.dialect.parser_dialect();
        Ok(Parser::parse_sql(dialect.as_ref(), sql)?)
    }

    /// Lineage of the single statement in `statement`.
    pub fn get_query_span(
        &self,
        catalog: &dyn CatalogAccessor,
        connected_database: &str,
        connected_schema: &str,
        statement: &str,
        ignore_case_sensitive: bool,
    ) -> Result<QuerySpan> {
        let statements = self.parse(statement)?;
        let [statement] = statements.as_slice() else {
            return Err(SpanError::StatementCount(statements.len()));
        };
        self.get_statement_span(
            catalog,
            connected_database,
            connected_schema,
            statement,
            ignore_case_sensitive,
        )
    }

    /// Lineage of an already parsed statement.
    pub fn get_statement_span(
        &self,
        catalog: &dyn CatalogAccessor,
        connected_database: &str,
        connected_schema: &str,
        statement: &Statement,
        ignore_case_sensitive: bool,
    ) -> Result<QuerySpan> {
        let query = match statement {
            Statement::Query(query) => query,
            Statement::Explain { .. } | Statement::ExplainTable { .. } => {
                return Ok(QuerySpan::default())
            }
            other => {
                return Err(SpanError::unsupported(format!(
                    "{} statement",
                    statement_kind(other)
                )))
            }
        };

        let names = NameMatcher::new(ignore_case_sensitive);
        if access::system_only(statement, self.dialect, names)? {
            debug!("statement reads system objects only");
            return Ok(QuerySpan::default());
        }

        let session = Session::new(
            self,
            catalog,
            connected_database,
            connected_schema,
            ignore_case_sensitive,
        );
        let table = Extractor::new(&session).eval_query(query)?;
        let span = QuerySpan::new(table.columns, session.take_predicates());
        debug!(
            results = span.results.len(),
            sources = span.source_columns.len(),
            predicates = span.predicate_columns.len(),
            "query span computed"
        );
        Ok(span)
    }
}

/// [`QuerySpanEngine::get_query_span`] with the default T-SQL engine.
pub fn get_query_span(
    catalog: &dyn CatalogAccessor,
    connected_database: &str,
    connected_schema: &str,
    statement: &str,
    ignore_case_sensitive: bool,
) -> Result<QuerySpan> {
    QuerySpanEngine::default().get_query_span(
        catalog,
        connected_database,
        connected_schema,
        statement,
        ignore_case_sensitive,
    )
}

fn statement_kind(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}
