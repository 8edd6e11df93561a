use crate::error::{Result, SpanError};
use crate::extractor::Extractor;
use crate::names::NameMatcher;
use crate::set_operation::{line_of, set_operation_branches};
use crate::table_source::PseudoTable;
use sqlparser::ast::{visit_relations, Cte, Query, SetExpr, With};
use std::ops::ControlFlow;
use tracing::debug;

/// A resolved CTE and the number of fixed-point rounds it took (zero for a
/// non-recursive CTE).
#[derive(Debug)]
pub(crate) struct FixedPoint {
    pub(crate) table: PseudoTable,
    pub(crate) iterations: usize,
}

impl<'s> Extractor<'s> {
    /// Evaluates a query expression: its WITH clause first, then the body.
    /// ORDER BY, LIMIT and friends do not change lineage.
    pub(crate) fn eval_query(&self, query: &Query) -> Result<PseudoTable> {
        let context = self.descend()?.with_ctes(query.with.as_ref())?;
        context.eval_set_expr(&query.body)
    }

    /// CTEs become visible one by one, so each may read the ones before it.
    fn with_ctes(self, with: Option<&With>) -> Result<Self> {
        let mut context = self;
        for cte in with.map(|w| w.cte_tables.as_slice()).unwrap_or_default() {
            let resolved = context.eval_cte(cte)?;
            debug!(cte = %resolved.table.name, iterations = resolved.iterations, "CTE resolved");
            context = context.push_cte(resolved.table);
        }
        Ok(context)
    }

    pub(crate) fn eval_cte(&self, cte: &Cte) -> Result<FixedPoint> {
        let name = cte.alias.name.value.clone();
        let columns: Vec<String> = cte
            .alias
            .columns
            .iter()
            .map(|c| c.name.value.clone())
            .collect();

        let branches = set_operation_branches(&cte.query.body);
        let recursive = branches.len() > 1
            && branches[1..]
                .iter()
                .any(|branch| references_table(branch, &name, self.names()));
        if !recursive {
            let body = self.derived().eval_query(&cte.query)?;
            let table = PseudoTable::new(name.clone(), body.columns).rename_columns(&columns, &name)?;
            return Ok(FixedPoint {
                table,
                iterations: 0,
            });
        }

        let context = self.derived().descend()?.with_ctes(cte.query.with.as_ref())?;
        context.eval_recursive_cte(name, &columns, &branches)
    }

    /// Anchor first, then every later branch re-evaluated against the running
    /// result until nothing grows.
    fn eval_recursive_cte(&self, name: String, columns: &[String], branches: &[&SetExpr]) -> Result<FixedPoint> {
        let anchor = self.eval_set_expr(branches[0])?;
        let mut table = PseudoTable::new(name.clone(), anchor.columns).rename_columns(columns, &name)?;
        let limit = self.session.engine.limits.max_fixed_point_iterations;

        let mut iterations = 0;
        loop {
            if iterations >= limit {
                return Err(SpanError::RecursionDidNotConverge {
                    cte: name,
                    iterations,
                });
            }
            iterations += 1;

            let context = self.push_cte(table.clone());
            let mut changed = false;
            for (position, branch) in branches.iter().enumerate().skip(1) {
                let round = context.eval_set_expr(branch)?;
                if round.columns.len() != table.columns.len() {
                    return Err(SpanError::ColumnCountMismatch {
                        context: format!(
                            "recursive clause {} of CTE {:?} near line {}",
                            position,
                            name,
                            line_of(branch)
                        ),
                        expected: table.columns.len(),
                        found: round.columns.len(),
                    });
                }
                for (column, update) in table.columns.iter_mut().zip(&round.columns) {
                    changed |= column.merge(update);
                }
            }
            debug!(cte = %name, iterations, changed, "recursive CTE round");
            if !changed {
                return Ok(FixedPoint { table, iterations });
            }
        }
    }
}

fn references_table(body: &SetExpr, name: &str, names: NameMatcher) -> bool {
    visit_relations(body, |relation| match relation.0.as_slice() {
        [ident] if names.eq(&ident.value, name) => ControlFlow::Break(()),
        _ => ControlFlow::Continue(()),
    })
    .is_break()
}
