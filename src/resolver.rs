use crate::catalog::TableMetadata;
use crate::error::{Result, SpanError};
use crate::extractor::Extractor;
use crate::names::{NameMatcher, TableName};
use crate::table_source::{PhysicalTable, PseudoTable, TableSource};
use sqlparser::ast::{
    Ident, JoinConstraint, JoinOperator, ObjectName, TableAlias, TableFactor, TableWithJoins,
};
use std::collections::HashMap;

fn alias_columns(alias: &TableAlias) -> Vec<String> {
    alias.columns.iter().map(|c| c.name.value.clone()).collect()
}

fn join_constraint(operator: &JoinOperator) -> Option<&JoinConstraint> {
    match operator {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::Semi(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::Anti(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c) => Some(c),
        JoinOperator::AsOf { constraint, .. } => Some(constraint),
        JoinOperator::CrossJoin | JoinOperator::CrossApply | JoinOperator::OuterApply => None,
    }
}

impl<'s> Extractor<'s> {
    /// Resolves a FROM clause into one ordered column universe. Join
    /// conditions are recorded as predicates along the way.
    pub(crate) fn resolve_from(&self, from: &[TableWithJoins]) -> Result<Vec<TableSource>> {
        let mut universe = Vec::new();
        for table in from {
            self.resolve_joined(table, &mut universe)?;
        }
        Ok(universe)
    }

    fn resolve_joined(&self, table: &TableWithJoins, universe: &mut Vec<TableSource>) -> Result<()> {
        let start = universe.len();
        let relation = self.resolve_table_factor(&table.relation, universe.as_slice(), false)?;
        universe.extend(relation);

        for join in &table.joins {
            let apply = matches!(
                join.join_operator,
                JoinOperator::CrossApply | JoinOperator::OuterApply
            );
            let left_end = universe.len();
            let right = self.resolve_table_factor(&join.relation, universe.as_slice(), apply)?;
            universe.extend(right);

            let (left, right) = universe[start..].split_at(left_end - start);
            match join_constraint(&join.join_operator) {
                Some(JoinConstraint::On(expr)) => {
                    self.enter_block(universe.clone(), HashMap::new())
                        .collect_predicate(expr)?;
                }
                Some(JoinConstraint::Using(columns)) => self.using_predicates(left, right, columns)?,
                Some(JoinConstraint::Natural) => self.natural_predicates(left, right),
                Some(JoinConstraint::None) | None => {}
            }
            if let JoinOperator::AsOf {
                match_condition, ..
            } = &join.join_operator
            {
                self.enter_block(universe.clone(), HashMap::new())
                    .collect_predicate(match_condition)?;
            }
        }
        Ok(())
    }

    /// `USING (c, ...)` reads `c` on both sides.
    fn using_predicates(&self, left: &[TableSource], right: &[TableSource], columns: &[Ident]) -> Result<()> {
        let names = self.names();
        for column in columns {
            for side in [left, right] {
                let found = side
                    .iter()
                    .find_map(|source| source.find_column(names, &column.value))
                    .ok_or_else(|| SpanError::ResourceNotFound {
                        database: String::new(),
                        schema: String::new(),
                        table: String::new(),
                        column: Some(column.value.clone()),
                    })?;
                self.session.add_predicates(&found.source_columns);
            }
        }
        Ok(())
    }

    /// NATURAL joins read every column name the two sides share.
    fn natural_predicates(&self, left: &[TableSource], right: &[TableSource]) {
        let names = self.names();
        for right_column in right.iter().flat_map(|source| source.query_span_results()) {
            let shared = left
                .iter()
                .find_map(|source| source.find_column(names, &right_column.name));
            if let Some(left_column) = shared {
                self.session.add_predicates(&left_column.source_columns);
                self.session.add_predicates(&right_column.source_columns);
            }
        }
    }

    /// `preceding` holds the relations to the left, visible to LATERAL
    /// derived tables and to the right side of APPLY.
    fn resolve_table_factor(
        &self,
        factor: &TableFactor,
        preceding: &[TableSource],
        apply: bool,
    ) -> Result<Vec<TableSource>> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                if args.is_some() {
                    return Err(SpanError::unsupported(format!("table-valued function {name}")));
                }
                let source = self.find_table_schema(name)?;
                let source = match alias {
                    Some(alias) => source.aliased(&alias.name.value, &alias_columns(alias))?,
                    None => source,
                };
                Ok(vec![source])
            }
            TableFactor::Derived {
                lateral,
                subquery,
                alias,
            } => {
                let context = if *lateral || apply {
                    self.lateral(preceding)
                } else {
                    self.derived()
                };
                let table = context.eval_query(subquery)?;
                let table = match alias {
                    Some(alias) => PseudoTable::new(alias.name.value.clone(), table.columns)
                        .rename_columns(&alias_columns(alias), &alias.name.value)?,
                    None => PseudoTable::anonymous(table.columns),
                };
                Ok(vec![TableSource::Pseudo(table)])
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias,
            } => {
                let mut nested = Vec::new();
                self.resolve_joined(table_with_joins, &mut nested)?;
                match alias {
                    None => Ok(nested),
                    Some(alias) => {
                        let columns = nested
                            .iter()
                            .flat_map(|source| source.query_span_results())
                            .collect();
                        let table = PseudoTable::new(alias.name.value.clone(), columns)
                            .rename_columns(&alias_columns(alias), &alias.name.value)?;
                        Ok(vec![TableSource::Pseudo(table)])
                    }
                }
            }
            TableFactor::Pivot { .. } => Err(SpanError::unsupported("PIVOT")),
            TableFactor::Unpivot { .. } => Err(SpanError::unsupported("UNPIVOT")),
            TableFactor::MatchRecognize { .. } => Err(SpanError::unsupported("MATCH_RECOGNIZE")),
            TableFactor::TableFunction { .. } | TableFactor::Function { .. } => {
                Err(SpanError::unsupported("rowset function"))
            }
            TableFactor::UNNEST { .. } => Err(SpanError::unsupported("UNNEST")),
            TableFactor::JsonTable { .. } | TableFactor::OpenJsonTable { .. } => {
                Err(SpanError::unsupported("JSON table"))
            }
        }
    }

    /// Resolves a table reference: CTEs first when unqualified, then the
    /// catalog under the connected database and schema defaults.
    pub(crate) fn find_table_schema(&self, name: &ObjectName) -> Result<TableSource> {
        let table = TableName::from_object_name(name)?;
        if !table.server.is_empty() {
            return Err(SpanError::LinkedServerUnsupported(name.to_string()));
        }
        if table.is_unqualified() {
            if let Some(cte) = self.scope.lookup(self.names(), &table.table) {
                return Ok(TableSource::Pseudo(cte.clone()));
            }
        }
        self.find_physical_table(&table).map(TableSource::Physical)
    }

    fn find_physical_table(&self, table: &TableName) -> Result<PhysicalTable> {
        let session = self.session;
        let names = session.names;
        let database = if table.database.is_empty() {
            session.connected_database
        } else {
            table.database.as_str()
        };
        let schema = if table.schema.is_empty() {
            session.connected_schema
        } else {
            table.schema.as_str()
        };

        for candidate in session.catalog.database_names()?.iter() {
            if !database.is_empty() && !names.eq(database, candidate) {
                continue;
            }
            let Some(metadata) = session.catalog.database(candidate)? else {
                continue;
            };
            let found = metadata
                .schemas
                .iter()
                .filter(|s| schema.is_empty() || names.eq(schema, &s.name))
                .find_map(|s| {
                    find_table(names, &s.tables, &table.table).map(|t| (s.name.as_str(), t))
                });
            if let Some((schema_name, found)) = found {
                return Ok(PhysicalTable {
                    server: String::new(),
                    database: metadata.name.clone(),
                    schema: schema_name.to_string(),
                    name: found.name.clone(),
                    columns: found.columns.clone(),
                });
            }
        }
        Err(SpanError::table_not_found(database, schema, &table.table))
    }
}

fn find_table<'t>(names: NameMatcher, tables: &'t [TableMetadata], name: &str) -> Option<&'t TableMetadata> {
    tables.iter().find(|t| names.eq(name, &t.name))
}
