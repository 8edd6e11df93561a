use crate::error::{Result, SpanError};
use crate::extractor::Extractor;
use crate::names::{ident_to_string, Qualifier};
use crate::node::is_local_variable;
use crate::span::QuerySpanResult;
use crate::table_source::PseudoTable;
use sqlparser::ast::{
    BinaryOperator, ExcludeSelectItem, Expr, NamedWindowDefinition, NamedWindowExpr, Select,
    SelectItem, Values, WildcardAdditionalOptions, WindowSpec,
};
use std::collections::{HashMap, HashSet};

impl<'s> Extractor<'s> {
    /// Output columns of one SELECT, in projection order.
    pub(crate) fn eval_select(&self, select: &Select) -> Result<PseudoTable> {
        if !select.lateral_views.is_empty() {
            return Err(SpanError::unsupported("LATERAL VIEW"));
        }
        if select.connect_by.is_some() {
            return Err(SpanError::unsupported("CONNECT BY"));
        }

        let universe = self.resolve_from(&select.from)?;
        let block = self.enter_block(universe, named_windows(select));

        for predicate in [
            &select.prewhere,
            &select.selection,
            &select.having,
            &select.qualify,
        ]
        .into_iter()
        .flatten()
        {
            block.collect_predicate(predicate)?;
        }

        let mut columns = Vec::with_capacity(select.projection.len());
        for item in &select.projection {
            block.eval_select_item(item, &mut columns)?;
        }
        Ok(PseudoTable::anonymous(columns))
    }

    fn eval_select_item(&self, item: &SelectItem, columns: &mut Vec<QuerySpanResult>) -> Result<()> {
        match item {
            SelectItem::UnnamedExpr(expr) if is_variable_assignment(expr) => {
                columns.push(QuerySpanResult::placeholder(format!(
                    "UNSUPPORTED LOCALID {item}"
                )));
            }
            // T-SQL dialects parse `@v = expr` as an alias assignment.
            SelectItem::ExprWithAlias { expr, alias } if is_local_variable(alias) => {
                columns.push(QuerySpanResult::placeholder(format!(
                    "UNSUPPORTED LOCALID {alias} = {expr}"
                )));
            }
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                columns.push(self.eval_expr(expr, select_item_output_name(item))?);
            }
            SelectItem::Wildcard(options) => {
                if self.from.is_empty() {
                    return Err(SpanError::unsupported("* without a FROM clause"));
                }
                let expanded = self.from.iter().flat_map(|source| source.query_span_results());
                self.push_wildcard(expanded, options, columns)?;
            }
            SelectItem::QualifiedWildcard(name, options) => {
                let qualifier = Qualifier::from_object_name(name)?;
                let source = self
                    .from
                    .iter()
                    .find(|source| source.matches(self.names(), &qualifier))
                    .ok_or_else(|| {
                        SpanError::table_not_found(
                            &qualifier.database,
                            &qualifier.schema,
                            &qualifier.table,
                        )
                    })?;
                self.push_wildcard(source.query_span_results(), options, columns)?;
            }
        }
        Ok(())
    }

    fn push_wildcard(
        &self,
        expanded: impl IntoIterator<Item = QuerySpanResult>,
        options: &WildcardAdditionalOptions,
        columns: &mut Vec<QuerySpanResult>,
    ) -> Result<()> {
        let excluded = excluded_columns(options)?;
        let names = self.names();
        columns.extend(
            expanded
                .into_iter()
                .filter(|column| !excluded.iter().any(|name| names.eq(name, &column.name))),
        );
        Ok(())
    }

    /// `VALUES` rows: the first row decides names and lineage.
    pub(crate) fn eval_values(&self, values: &Values) -> Result<PseudoTable> {
        let mut columns = Vec::new();
        if let Some(row) = values.rows.first() {
            for expr in row {
                columns.push(self.eval_expr(expr, expr.to_string())?);
            }
        }
        Ok(PseudoTable::anonymous(columns))
    }
}

/// T-SQL `SELECT @v = expr`.
fn is_variable_assignment(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::BinaryOp { left, op: BinaryOperator::Eq, .. }
            if matches!(left.as_ref(), Expr::Identifier(ident) if is_local_variable(ident))
    )
}

fn select_item_output_name(item: &SelectItem) -> String {
    match item {
        SelectItem::ExprWithAlias { alias, .. } => ident_to_string(alias),
        SelectItem::UnnamedExpr(Expr::Identifier(ident)) => ident_to_string(ident),
        SelectItem::UnnamedExpr(Expr::CompoundIdentifier(idents)) => {
            idents.last().map(ident_to_string).unwrap_or_default()
        }
        other => other.to_string(),
    }
}

fn excluded_columns(options: &WildcardAdditionalOptions) -> Result<Vec<String>> {
    if options.opt_ilike.is_some() {
        return Err(SpanError::unsupported("ILIKE in wildcard"));
    }
    if options.opt_replace.is_some() {
        return Err(SpanError::unsupported("REPLACE in wildcard"));
    }
    if options.opt_rename.is_some() {
        return Err(SpanError::unsupported("RENAME in wildcard"));
    }
    let mut excluded = Vec::new();
    match &options.opt_exclude {
        Some(ExcludeSelectItem::Single(ident)) => excluded.push(ident_to_string(ident)),
        Some(ExcludeSelectItem::Multiple(idents)) => {
            excluded.extend(idents.iter().map(ident_to_string))
        }
        None => {}
    }
    if let Some(except) = &options.opt_except {
        excluded.push(ident_to_string(&except.first_element));
        excluded.extend(except.additional_elements.iter().map(ident_to_string));
    }
    Ok(excluded)
}

fn named_windows(select: &Select) -> HashMap<String, WindowSpec> {
    let definitions: HashMap<&str, &NamedWindowExpr> = select
        .named_window
        .iter()
        .map(|NamedWindowDefinition(name, expr)| (name.value.as_str(), expr))
        .collect();
    definitions
        .keys()
        .filter_map(|name| {
            resolve_named_window(name, &definitions, &mut HashSet::new())
                .map(|spec| (name.to_string(), spec))
        })
        .collect()
}

fn resolve_named_window<'a>(
    name: &'a str,
    definitions: &HashMap<&'a str, &'a NamedWindowExpr>,
    visiting: &mut HashSet<&'a str>,
) -> Option<WindowSpec> {
    if !visiting.insert(name) {
        return None;
    }
    match definitions.get(name)? {
        NamedWindowExpr::WindowSpec(spec) => Some(spec.clone()),
        NamedWindowExpr::NamedWindow(id) => resolve_named_window(&id.value, definitions, visiting),
    }
}
