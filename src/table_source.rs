use crate::catalog::ColumnMetadata;
use crate::error::{Result, SpanError};
use crate::names::{NameMatcher, Qualifier};
use crate::span::{ColumnRef, MaskingAttribute, QuerySpanResult, SourceColumnSet};

/// A catalog table as seen by one statement.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PhysicalTable {
    pub(crate) server: String,
    pub(crate) database: String,
    pub(crate) schema: String,
    pub(crate) name: String,
    pub(crate) columns: Vec<ColumnMetadata>,
}

impl PhysicalTable {
    fn column_result(&self, column: &ColumnMetadata) -> QuerySpanResult {
        let source = ColumnRef {
            server: self.server.clone(),
            database: self.database.clone(),
            schema: self.schema.clone(),
            table: self.name.clone(),
            column: column.name.clone(),
        };
        QuerySpanResult::new(
            column.name.clone(),
            SourceColumnSet::from_iter([source]),
            MaskingAttribute::new(column.masking),
        )
    }
}

/// A named list of lineage-tagged columns that is not a catalog table: CTEs,
/// derived tables, aliased relations and VALUES lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct PseudoTable {
    pub(crate) name: String,
    pub(crate) columns: Vec<QuerySpanResult>,
}

impl PseudoTable {
    pub(crate) fn new(name: impl Into<String>, columns: Vec<QuerySpanResult>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub(crate) fn anonymous(columns: Vec<QuerySpanResult>) -> Self {
        Self::new(String::new(), columns)
    }

    /// Positional rename from an explicit column list; an empty list keeps the
    /// current names.
    pub(crate) fn rename_columns(mut self, names: &[String], context: &str) -> Result<Self> {
        if names.is_empty() {
            return Ok(self);
        }
        if names.len() != self.columns.len() {
            return Err(SpanError::ColumnCountMismatch {
                context: format!("column alias list of {context}"),
                expected: self.columns.len(),
                found: names.len(),
            });
        }
        for (column, name) in self.columns.iter_mut().zip(names) {
            column.name = name.clone();
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TableSource {
    Physical(PhysicalTable),
    Pseudo(PseudoTable),
}

impl TableSource {
    pub(crate) fn table_name(&self) -> &str {
        match self {
            TableSource::Physical(table) => &table.name,
            TableSource::Pseudo(table) => &table.name,
        }
    }

    pub(crate) fn schema_name(&self) -> &str {
        match self {
            TableSource::Physical(table) => &table.schema,
            TableSource::Pseudo(_) => "",
        }
    }

    pub(crate) fn database_name(&self) -> &str {
        match self {
            TableSource::Physical(table) => &table.database,
            TableSource::Pseudo(_) => "",
        }
    }

    pub(crate) fn query_span_results(&self) -> Vec<QuerySpanResult> {
        match self {
            TableSource::Physical(table) => table
                .columns
                .iter()
                .map(|c| table.column_result(c))
                .collect(),
            TableSource::Pseudo(table) => table.columns.clone(),
        }
    }

    /// First column with the given name, under the case policy.
    pub(crate) fn find_column(&self, names: NameMatcher, column: &str) -> Option<QuerySpanResult> {
        match self {
            TableSource::Physical(table) => table
                .columns
                .iter()
                .find(|c| names.eq(column, &c.name))
                .map(|c| table.column_result(c)),
            TableSource::Pseudo(table) => table
                .columns
                .iter()
                .find(|c| names.eq(column, &c.name))
                .cloned(),
        }
    }

    pub(crate) fn matches(&self, names: NameMatcher, qualifier: &Qualifier) -> bool {
        qualifier.matches(
            names,
            self.database_name(),
            self.schema_name(),
            self.table_name(),
        )
    }

    /// `AS alias [(columns)]`: the relation is only reachable through the alias
    /// afterwards, so database and schema are dropped.
    pub(crate) fn aliased(self, alias: &str, columns: &[String]) -> Result<TableSource> {
        let table = PseudoTable::new(alias, self.query_span_results());
        Ok(TableSource::Pseudo(table.rename_columns(columns, alias)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::MaskingLevel;
    use pretty_assertions::assert_eq;

    fn physical() -> TableSource {
        TableSource::Physical(PhysicalTable {
            server: String::new(),
            database: "db".to_string(),
            schema: "dbo".to_string(),
            name: "MyTable1".to_string(),
            columns: vec![
                ColumnMetadata {
                    name: "a".to_string(),
                    masking: MaskingLevel::Full,
                },
                ColumnMetadata {
                    name: "b".to_string(),
                    masking: MaskingLevel::None,
                },
            ],
        })
    }

    #[test]
    fn test_physical_columns_carry_catalog_masking() {
        let results = physical().query_span_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "a");
        assert_eq!(results[0].masking_attribute.level, MaskingLevel::Full);
        assert!(results[0]
            .source_columns
            .contains(&ColumnRef::new("db", "dbo", "MyTable1", "a")));
    }

    #[test]
    fn test_alias_drops_qualifiers_and_keeps_lineage() -> Result<()> {
        let aliased = physical().aliased("t", &["x".to_string(), "y".to_string()])?;
        assert_eq!(aliased.table_name(), "t");
        assert_eq!(aliased.schema_name(), "");
        let names = NameMatcher::new(false);
        let x = aliased.find_column(names, "x").unwrap();
        assert!(x
            .source_columns
            .contains(&ColumnRef::new("db", "dbo", "MyTable1", "a")));
        assert!(aliased.find_column(names, "a").is_none());
        Ok(())
    }

    #[test]
    fn test_alias_column_count_mismatch() {
        let err = physical().aliased("t", &["x".to_string()]).unwrap_err();
        assert_eq!(
            err,
            SpanError::ColumnCountMismatch {
                context: "column alias list of t".to_string(),
                expected: 2,
                found: 1,
            }
        );
    }
}
