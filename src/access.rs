use crate::dialect::SqlDialect;
use crate::error::{Result, SpanError};
use crate::names::{NameMatcher, TableName};
use sqlparser::ast::{ObjectName, Query, Statement, Visit, Visitor};
use std::convert::Infallible;
use std::ops::ControlFlow;

#[derive(Default)]
struct RelationCollector {
    ctes: Vec<String>,
    relations: Vec<ObjectName>,
}

impl Visitor for RelationCollector {
    type Break = Infallible;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            self.ctes
                .extend(with.cte_tables.iter().map(|cte| cte.alias.name.value.clone()));
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        self.relations.push(relation.clone());
        ControlFlow::Continue(())
    }
}

fn system_object(table: &TableName, dialect: SqlDialect) -> Option<String> {
    if !table.database.is_empty() && dialect.is_system_database(&table.database) {
        return Some(format!("system database {:?}", table.database));
    }
    if !table.schema.is_empty() && dialect.is_system_schema(&table.schema) {
        return Some(format!("system schema {:?}", table.schema));
    }
    if table.is_unqualified() && dialect.is_system_table(&table.table) {
        return Some(format!("system table {:?}", table.table));
    }
    None
}

/// Whether the statement reads only system catalog objects. Statements that
/// mix system and user tables are rejected.
pub(crate) fn system_only(statement: &Statement, dialect: SqlDialect, names: NameMatcher) -> Result<bool> {
    let mut collector = RelationCollector::default();
    if let ControlFlow::Break(never) = statement.visit(&mut collector) {
        match never {}
    }

    let mut user = None;
    let mut system = None;
    for relation in &collector.relations {
        let table = TableName::from_object_name(relation)?;
        if table.is_unqualified() && collector.ctes.iter().any(|cte| names.eq(cte, &table.table)) {
            continue;
        }
        match system_object(&table, dialect) {
            Some(object) => {
                system.get_or_insert(object);
            }
            None => {
                user.get_or_insert_with(|| {
                    format!("user table {:?}.{:?}", table.schema, table.table)
                });
            }
        }
    }

    match (user, system) {
        (Some(user), Some(system)) => Err(SpanError::MixedSystemUserAccess { user, system }),
        (None, Some(_)) => Ok(true),
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlparser::parser::Parser;

    fn check(dialect: SqlDialect, sql: &str) -> Result<bool> {
        let statements = Parser::parse_sql(dialect.parser_dialect().as_ref(), sql)?;
        system_only(&statements[0], dialect, NameMatcher::new(true))
    }

    #[test]
    fn test_user_and_system_tables_are_exclusive() -> Result<()> {
        assert!(!check(SqlDialect::Mssql, "SELECT a FROM dbo.MyTable1")?);
        assert!(check(SqlDialect::Mssql, "SELECT name FROM sys.objects")?);
        assert!(check(SqlDialect::Postgres, "SELECT relname FROM pg_class")?);
        assert!(check(
            SqlDialect::Postgres,
            "SELECT table_name FROM information_schema.tables"
        )?);

        let err = check(
            SqlDialect::Mssql,
            "SELECT a FROM dbo.MyTable1 JOIN sys.objects ON 1 = 1",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"cannot access user table "dbo"."MyTable1" and system schema "sys" at the same time"#
        );
        Ok(())
    }

    #[test]
    fn test_ctes_are_not_catalog_objects() -> Result<()> {
        let sql = "WITH sysobjects AS (SELECT a FROM MyTable1) SELECT * FROM sysobjects";
        assert!(!check(SqlDialect::Mssql, sql)?);
        assert!(check(SqlDialect::Mssql, "SELECT * FROM sysobjects")?);
        Ok(())
    }

    #[test]
    fn test_no_relations_is_not_system() -> Result<()> {
        assert!(!check(SqlDialect::Mssql, "SELECT 1")?);
        Ok(())
    }
}
