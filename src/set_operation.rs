use crate::error::{Result, SpanError};
use crate::extractor::Extractor;
use crate::table_source::PseudoTable;
use sqlparser::ast::{SetExpr, Spanned};

impl<'s> Extractor<'s> {
    pub(crate) fn eval_set_expr(&self, body: &SetExpr) -> Result<PseudoTable> {
        match body {
            SetExpr::Select(select) => self.eval_select(select),
            SetExpr::Query(query) => self.eval_query(query),
            SetExpr::Values(values) => self.eval_values(values),
            SetExpr::SetOperation { .. } => {
                let branches = set_operation_branches(body);
                let mut tables = Vec::with_capacity(branches.len());
                for branch in branches {
                    tables.push((self.eval_set_expr(branch)?, line_of(branch)));
                }
                union_table_sources(tables)
            }
            SetExpr::Table(table) => Err(SpanError::unsupported(format!("{table}"))),
            SetExpr::Insert(_) => Err(SpanError::unsupported("INSERT in a query body")),
            SetExpr::Update(_) => Err(SpanError::unsupported("UPDATE in a query body")),
        }
    }
}

/// Branches of a chain of UNION / INTERSECT / EXCEPT, left to right.
pub(crate) fn set_operation_branches(body: &SetExpr) -> Vec<&SetExpr> {
    let mut branches = Vec::new();
    let mut pending = vec![body];
    while let Some(expr) = pending.pop() {
        match expr {
            SetExpr::SetOperation { left, right, .. } => {
                pending.push(right);
                pending.push(left);
            }
            other => branches.push(other),
        }
    }
    branches
}

pub(crate) fn line_of(body: &SetExpr) -> u64 {
    body.span().start.line
}

/// Positional merge of set-operation branches. Names come from the first
/// branch; every branch must have the same number of columns.
pub(crate) fn union_table_sources(branches: Vec<(PseudoTable, u64)>) -> Result<PseudoTable> {
    let mut branches = branches.into_iter();
    let Some((mut combined, first_line)) = branches.next() else {
        return Ok(PseudoTable::default());
    };
    for (position, (branch, line)) in branches.enumerate() {
        if branch.columns.len() != combined.columns.len() {
            return Err(SpanError::ColumnCountMismatch {
                context: format!(
                    "branch {} of set operation near line {} does not match the first branch near line {}",
                    position + 2,
                    line,
                    first_line
                ),
                expected: combined.columns.len(),
                found: branch.columns.len(),
            });
        }
        for (column, other) in combined.columns.iter_mut().zip(&branch.columns) {
            column.merge(other);
        }
    }
    Ok(combined)
}
