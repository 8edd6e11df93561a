use crate::error::{Result, SpanError};
use crate::extractor::Extractor;
use crate::names::ColumnPath;
use crate::node::{classify, datepart_argument, ExprKind};
use crate::span::{MaskingAttribute, QuerySpanResult, SourceColumnSet};
use sqlparser::ast::{Expr, Function, Ident, Query, Visit, Visitor, WindowSpec, WindowType};
use std::ops::ControlFlow;

impl<'s> Extractor<'s> {
    /// Lineage of one scalar expression. The result carries the given name.
    pub(crate) fn eval_expr(&self, expr: &Expr, name: impl Into<String>) -> Result<QuerySpanResult> {
        let mut fold = LineageFold::new(self);
        if let ControlFlow::Break(err) = expr.visit(&mut fold) {
            return Err(err);
        }
        Ok(QuerySpanResult::new(name, fold.sources, fold.attribute))
    }

    /// Records the columns a filtering expression reads.
    pub(crate) fn collect_predicate(&self, expr: &Expr) -> Result<()> {
        let result = self.eval_expr(expr, "")?;
        self.session.add_predicates(&result.source_columns);
        Ok(())
    }

    /// Resolves a column reference against the current FROM universe, then
    /// against the enclosing ones. The first matching relation wins.
    pub(crate) fn resolve_column(&self, idents: &[Ident]) -> Result<QuerySpanResult> {
        let path = ColumnPath::from_idents(idents)?;
        let names = self.names();
        self.from
            .iter()
            .chain(self.outer.iter())
            .filter(|source| source.matches(names, &path.qualifier))
            .find_map(|source| source.find_column(names, &path.column))
            .ok_or_else(|| SpanError::ResourceNotFound {
                database: path.qualifier.database.clone(),
                schema: path.qualifier.schema.clone(),
                table: path.qualifier.table.clone(),
                column: Some(path.column.clone()),
            })
    }

    fn named_window(&self, name: &Ident) -> Result<&WindowSpec> {
        let names = self.names();
        self.windows
            .iter()
            .find(|(key, _)| names.eq(key, &name.value))
            .map(|(_, spec)| spec)
            .ok_or_else(|| SpanError::unsupported(format!("reference to undefined window {name}")))
    }
}

/// Single pass over an expression tree accumulating lineage.
///
/// Subqueries are handed to a child evaluator in `pre_visit_query`; everything
/// the visitor reaches below them is ignored until the matching
/// `post_visit_query`.
struct LineageFold<'x, 's> {
    extractor: &'x Extractor<'s>,
    sources: SourceColumnSet,
    attribute: MaskingAttribute,
    /// Open never-change calls, innermost last.
    fixed: Vec<MaskingAttribute>,
    /// Datepart keywords seen so far; they read as literals.
    dateparts: Vec<*const Expr>,
    depth: usize,
    query_depth: usize,
}

impl<'x, 's> LineageFold<'x, 's> {
    fn new(extractor: &'x Extractor<'s>) -> Self {
        Self {
            extractor,
            sources: SourceColumnSet::new(),
            attribute: MaskingAttribute::default(),
            fixed: Vec::new(),
            dateparts: Vec::new(),
            depth: 0,
            query_depth: 0,
        }
    }

    fn absorb(&mut self, operand: &QuerySpanResult) {
        self.sources.merge(&operand.source_columns);
        if self.fixed.is_empty() {
            self.attribute.transmitted_by(&operand.masking_attribute);
        }
    }

    fn never_change(&self, function: &Function) -> Option<MaskingAttribute> {
        self.extractor
            .session
            .engine
            .functions
            .never_change_level(&function.name)
            .map(MaskingAttribute::fixed)
    }

    fn column(&mut self, idents: &[Ident]) -> Result<()> {
        let operand = self.extractor.resolve_column(idents)?;
        if self.depth == 1 {
            // A bare column keeps its attribute as is, fixed or not.
            self.sources.merge(&operand.source_columns);
            self.attribute = operand.masking_attribute;
        } else {
            self.absorb(&operand);
        }
        Ok(())
    }

    fn function(&mut self, function: &Function) -> ControlFlow<SpanError> {
        if let Some(fixed) = self.never_change(function) {
            self.fixed.push(fixed);
        }
        if let Some(datepart) = datepart_argument(function) {
            self.dateparts.push(datepart);
        }
        let window = match &function.over {
            Some(WindowType::NamedWindow(name)) => Some(name),
            Some(WindowType::WindowSpec(spec)) => spec.window_name.as_ref(),
            None => None,
        };
        match window {
            Some(name) => self.window(name),
            None => ControlFlow::Continue(()),
        }
    }

    /// PARTITION BY / ORDER BY of a named window, following `WINDOW w2 AS (w1 ...)`
    /// chains.
    fn window(&mut self, name: &Ident) -> ControlFlow<SpanError> {
        let extractor = self.extractor;
        let mut next = Some(name);
        let mut hops = 0;
        while let Some(name) = next {
            if hops > extractor.windows.len() {
                return ControlFlow::Break(SpanError::unsupported(format!(
                    "cyclic window definition {name}"
                )));
            }
            let spec = match extractor.named_window(name) {
                Ok(spec) => spec,
                Err(err) => return ControlFlow::Break(err),
            };
            spec.partition_by.visit(self)?;
            for order_by in &spec.order_by {
                order_by.expr.visit(self)?;
            }
            next = spec.window_name.as_ref();
            hops += 1;
        }
        ControlFlow::Continue(())
    }

    fn subquery(&mut self, query: &Query) -> Result<()> {
        let table = self.extractor.subquery().eval_query(query)?;
        for column in &table.columns {
            self.absorb(column);
        }
        Ok(())
    }
}

impl Visitor for LineageFold<'_, '_> {
    type Break = SpanError;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if self.query_depth == 0 {
            if let Err(err) = self.subquery(query) {
                return ControlFlow::Break(err);
            }
        }
        self.query_depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.query_depth -= 1;
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.query_depth > 0 {
            return ControlFlow::Continue(());
        }
        self.depth += 1;
        let kind = if self.dateparts.iter().any(|d| std::ptr::eq(*d, expr)) {
            ExprKind::Literal
        } else {
            classify(expr)
        };
        match kind {
            ExprKind::Column(idents) => {
                if let Err(err) = self.column(idents) {
                    return ControlFlow::Break(err);
                }
            }
            ExprKind::Function(function) => return self.function(function),
            ExprKind::Literal | ExprKind::Variable | ExprKind::Subquery | ExprKind::Composite => {}
        }
        ControlFlow::Continue(())
    }

    fn post_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.query_depth > 0 {
            return ControlFlow::Continue(());
        }
        if let ExprKind::Function(function) = classify(expr) {
            if self.never_change(function).is_some() {
                if let Some(fixed) = self.fixed.pop() {
                    if self.fixed.is_empty() {
                        if self.depth == 1 {
                            self.attribute = fixed;
                        } else {
                            self.attribute.transmitted_by(&fixed);
                        }
                    }
                }
            }
        }
        self.depth -= 1;
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::SpanError;
    use crate::span::{ColumnRef, MaskingAttribute, MaskingLevel};
    use crate::test_support::{column, span_of};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_operator_takes_the_most_restrictive_operand() -> crate::Result<()> {
        let span = span_of("SELECT b + d AS bd, UPPER(c) FROM MyTable1")?;
        assert_eq!(span.results[0].name, "bd");
        assert_eq!(span.results[0].masking_attribute.level, MaskingLevel::Partial);
        assert_eq!(
            span.results[0].source_columns,
            [column("MyTable1", "b"), column("MyTable1", "d")]
                .into_iter()
                .collect()
        );
        assert_eq!(span.results[1].name, "UPPER(c)");
        assert_eq!(span.results[1].masking_attribute.level, MaskingLevel::None);
        Ok(())
    }

    #[test]
    fn test_literals_and_variables_have_no_lineage() -> crate::Result<()> {
        let span = span_of("SELECT 1, 'x' + @suffix AS s FROM MyTable1")?;
        assert_eq!(span.results[0].name, "1");
        assert!(span.results[0].source_columns.is_empty());
        assert_eq!(span.results[1].masking_attribute, MaskingAttribute::default());
        assert!(span.results[1].source_columns.is_empty());
        Ok(())
    }

    #[test]
    fn test_case_expression_merges_every_branch() -> crate::Result<()> {
        let span = span_of("SELECT CASE WHEN b > 0 THEN c ELSE a END AS x FROM MyTable1")?;
        let result = &span.results[0];
        assert_eq!(result.masking_attribute.level, MaskingLevel::Full);
        assert_eq!(result.source_columns.len(), 3);
        Ok(())
    }

    #[test]
    fn test_never_change_function_fixes_the_level() -> crate::Result<()> {
        let span = span_of("SELECT COUNT(a) AS n, HASHBYTES('SHA2_256', a) AS h, COUNT(a) + d AS m FROM MyTable1")?;
        assert_eq!(
            span.results[0].masking_attribute,
            MaskingAttribute::fixed(MaskingLevel::None)
        );
        assert!(span.results[0]
            .source_columns
            .contains(&column("MyTable1", "a")));
        assert_eq!(
            span.results[1].masking_attribute,
            MaskingAttribute::fixed(MaskingLevel::Partial)
        );
        assert_eq!(
            span.results[2].masking_attribute,
            MaskingAttribute::new(MaskingLevel::Partial)
        );
        Ok(())
    }

    #[test]
    fn test_datepart_keyword_is_not_a_column() -> crate::Result<()> {
        let span = span_of(
            "SELECT DATEADD(day, 1, a) AS x, DATEDIFF(day, b, d) AS y, DATEPART(year, c) AS z FROM MyTable1",
        )?;
        assert_eq!(
            span.results[0].source_columns,
            [column("MyTable1", "a")].into_iter().collect()
        );
        assert_eq!(span.results[0].masking_attribute.level, MaskingLevel::Full);
        assert_eq!(
            span.results[1].source_columns,
            [column("MyTable1", "b"), column("MyTable1", "d")]
                .into_iter()
                .collect()
        );
        assert_eq!(span.results[1].masking_attribute.level, MaskingLevel::Partial);
        assert_eq!(
            span.results[2].source_columns,
            [column("MyTable1", "c")].into_iter().collect()
        );
        Ok(())
    }

    #[test]
    fn test_datepart_position_only_applies_to_the_first_argument() {
        // A bare identifier elsewhere is still a column reference.
        let err = span_of("SELECT DATEADD(day, unit, a) FROM MyTable1").unwrap_err();
        assert!(matches!(
            err,
            SpanError::ResourceNotFound { column: Some(ref c), .. } if c == "unit"
        ));
    }

    #[test]
    fn test_scalar_subquery_contributes_lineage() -> crate::Result<()> {
        let span = span_of("SELECT b, (SELECT MAX(e) FROM MyTable2) AS top_e FROM MyTable1")?;
        let top_e = &span.results[1];
        assert_eq!(top_e.name, "top_e");
        assert_eq!(top_e.masking_attribute.level, MaskingLevel::Full);
        assert!(top_e.source_columns.contains(&column("MyTable2", "e")));
        Ok(())
    }

    #[test]
    fn test_correlated_subquery_reads_the_outer_block() -> crate::Result<()> {
        let span = span_of(
            "SELECT (SELECT f FROM MyTable2 WHERE MyTable2.e = t.a) AS f FROM MyTable1 AS t",
        )?;
        assert_eq!(
            span.results[0].source_columns,
            [column("MyTable2", "f")].into_iter().collect()
        );
        assert!(span.predicate_columns.contains(&column("MyTable1", "a")));
        assert!(span.predicate_columns.contains(&column("MyTable2", "e")));
        Ok(())
    }

    #[test]
    fn test_named_window_contributes_partition_lineage() -> crate::Result<()> {
        let span = span_of(
            "SELECT ROW_NUMBER() OVER w AS rn FROM MyTable1 WINDOW w AS (PARTITION BY d ORDER BY b)",
        )?;
        assert_eq!(
            span.results[0].source_columns,
            [column("MyTable1", "b"), column("MyTable1", "d")]
                .into_iter()
                .collect()
        );
        assert_eq!(span.results[0].masking_attribute.level, MaskingLevel::Partial);
        Ok(())
    }

    #[test]
    fn test_unknown_column_is_reported() {
        let err = span_of("SELECT t.zzz FROM MyTable1 AS t").unwrap_err();
        assert_eq!(
            err,
            SpanError::ResourceNotFound {
                database: String::new(),
                schema: String::new(),
                table: "t".to_string(),
                column: Some("zzz".to_string()),
            }
        );
    }

    #[test]
    fn test_first_matching_table_wins() -> crate::Result<()> {
        let span = span_of("SELECT a FROM MyTable1 CROSS JOIN MyTable1 AS other")?;
        assert_eq!(
            span.results[0].source_columns,
            [ColumnRef::new("db", "dbo", "MyTable1", "a")].into_iter().collect()
        );
        Ok(())
    }
}
