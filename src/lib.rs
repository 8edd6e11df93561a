//! Column lineage and masking propagation for SQL queries.
//!
//! Given one statement and a catalog whose columns carry a masking level,
//! [`QuerySpanEngine::get_query_span`] reports, for every output column, the
//! base-table columns it may carry data from and the most restrictive masking
//! level among them. Columns that are only filtered on are reported apart as
//! predicate columns.
//!
//! Any error means the lineage could not be determined; callers enforcing
//! masking policies must not read it as "nothing sensitive".

mod access;
pub mod catalog;
pub mod config;
mod cte;
pub mod dialect;
pub mod engine;
pub mod error;
mod expression;
mod extractor;
mod names;
mod node;
pub mod registry;
mod resolver;
mod scope;
mod select;
mod set_operation;
pub mod span;
mod table_source;

pub use catalog::{
    CatalogAccessor, ColumnMetadata, DatabaseMetadata, InMemoryCatalog, SchemaMetadata,
    TableMetadata,
};
pub use dialect::SqlDialect;
pub use engine::{get_query_span, Limits, QuerySpanEngine};
pub use error::{Result, SpanError};
pub use registry::FunctionRegistry;
pub use span::{
    ColumnRef, MaskingAttribute, MaskingLevel, QuerySpan, QuerySpanResult, SourceColumnSet,
};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::catalog::{DatabaseMetadata, InMemoryCatalog};
    use crate::engine::QuerySpanEngine;
    use crate::error::Result;
    use crate::span::{ColumnRef, MaskingLevel, QuerySpan};
    use sqlparser::ast::{Query, Statement};

    pub(crate) fn fixture_catalog() -> InMemoryCatalog {
        use MaskingLevel::{Full, Partial};
        let none = MaskingLevel::None;
        InMemoryCatalog::new().with_database(
            DatabaseMetadata::new("db")
                .with_table(
                    "dbo",
                    "MyTable1",
                    &[("a", Full), ("b", none), ("c", none), ("d", Partial)],
                )
                .with_table("dbo", "MyTable2", &[("e", Full), ("f", none)])
                .with_table("public", "t1", &[("id", none), ("x", Partial)])
                .with_table("public", "t2", &[("id", none), ("y", none)])
                .with_table("sys", "objects", &[("name", none), ("object_id", none)]),
        )
    }

    /// A column of the fixture's `db.dbo` schema.
    pub(crate) fn column(table: &str, column: &str) -> ColumnRef {
        ColumnRef::new("db", "dbo", table, column)
    }

    pub(crate) fn span_with(
        sql: &str,
        database: &str,
        schema: &str,
        ignore_case_sensitive: bool,
    ) -> Result<QuerySpan> {
        QuerySpanEngine::default().get_query_span(
            &fixture_catalog(),
            database,
            schema,
            sql,
            ignore_case_sensitive,
        )
    }

    pub(crate) fn span_of(sql: &str) -> Result<QuerySpan> {
        span_with(sql, "db", "dbo", false)
    }

    pub(crate) fn span_in(engine: &QuerySpanEngine, sql: &str) -> Result<QuerySpan> {
        engine.get_query_span(&fixture_catalog(), "db", "dbo", sql, false)
    }

    pub(crate) fn parse_query(sql: &str) -> Query {
        let statements = QuerySpanEngine::default().parse(sql).unwrap();
        match statements.into_iter().next() {
            Some(Statement::Query(query)) => *query,
            other => panic!("expected a query, got {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{column, fixture_catalog, span_of};
    use pretty_assertions::assert_eq;

    fn levels(span: &QuerySpan) -> Vec<(&str, MaskingLevel)> {
        span.results
            .iter()
            .map(|r| (r.name.as_str(), r.masking_attribute.level))
            .collect()
    }

    #[test]
    fn test_select_star_from_my_table1() -> Result<()> {
        let catalog = fixture_catalog();
        let span = get_query_span(&catalog, "db", "dbo", "SELECT * FROM MyTable1;", false)?;
        assert_eq!(
            levels(&span),
            vec![
                ("a", MaskingLevel::Full),
                ("b", MaskingLevel::None),
                ("c", MaskingLevel::None),
                ("d", MaskingLevel::Partial),
            ]
        );
        assert!(span.predicate_columns.is_empty());
        Ok(())
    }

    #[test]
    fn test_join_does_not_blend_lineage() -> Result<()> {
        let span = span_of("SELECT a, b, c, d, e FROM MyTable1 JOIN MyTable2 ON MyTable1.a = MyTable2.e")?;
        assert_eq!(span.results.len(), 5);
        for result in &span.results {
            assert_eq!(result.source_columns.len(), 1);
        }
        assert_eq!(
            span.results[4].source_columns,
            [column("MyTable2", "e")].into_iter().collect()
        );
        Ok(())
    }

    #[test]
    fn test_set_operation_takes_max_level_and_anchor_name() -> Result<()> {
        let span = span_of("SELECT b FROM MyTable1 UNION SELECT e FROM MyTable2")?;
        assert_eq!(levels(&span), vec![("b", MaskingLevel::Full)]);
        Ok(())
    }

    #[test]
    fn test_union_arity_mismatch() {
        let err = span_of("SELECT a, b FROM MyTable1 UNION ALL SELECT e FROM MyTable2").unwrap_err();
        assert!(matches!(err, SpanError::ColumnCountMismatch { .. }));
    }

    #[test]
    fn test_alias_rename_keeps_lineage() -> Result<()> {
        let direct = span_of("SELECT a, b FROM MyTable1")?;
        let aliased = span_of("SELECT tt.a, b FROM (SELECT * FROM MyTable1) AS tt")?;
        assert_eq!(aliased.results, direct.results);
        Ok(())
    }

    #[test]
    fn test_cte_shadowing_in_body_and_main_query() -> Result<()> {
        let span = span_of(
            r#"
            WITH MyTable2 AS (SELECT d AS e, b AS f FROM MyTable1),
                 reader AS (SELECT e FROM MyTable2)
            SELECT reader.e, MyTable2.f FROM reader, MyTable2
            "#,
        )?;
        assert_eq!(
            levels(&span),
            vec![("e", MaskingLevel::Partial), ("f", MaskingLevel::None)]
        );
        assert_eq!(
            span.source_columns,
            [column("MyTable1", "b"), column("MyTable1", "d")]
                .into_iter()
                .collect()
        );
        Ok(())
    }

    #[test]
    fn test_recursive_cte_reaches_full() -> Result<()> {
        let span = span_of(
            r#"
            WITH cte(c1, c2) AS (
                SELECT a, b FROM MyTable1
                UNION ALL
                SELECT c1 * c2, c1 FROM cte
            )
            SELECT * FROM cte
            "#,
        )?;
        assert_eq!(
            levels(&span),
            vec![("c1", MaskingLevel::Full), ("c2", MaskingLevel::Full)]
        );
        Ok(())
    }

    #[test]
    fn test_query_span_serializes() -> Result<()> {
        let span = span_of("SELECT d FROM MyTable1 WHERE b = 1")?;
        let json = serde_json::to_value(&span).map_err(|e| SpanError::Config(e.to_string()))?;
        assert_eq!(json["results"][0]["name"], "d");
        assert_eq!(json["results"][0]["masking_attribute"]["level"], "PARTIAL");
        assert_eq!(json["predicate_columns"][0]["column"], "b");
        Ok(())
    }
}
