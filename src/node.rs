use sqlparser::ast::{Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments, Ident};

/// Built-ins whose first argument is a datepart keyword (`day`, `month`, ...).
const DATEPART_FUNCTIONS: &[&str] = &[
    "dateadd",
    "datediff",
    "datediff_big",
    "datepart",
    "datename",
    "datetrunc",
    "date_bucket",
];

/// What an expression node means for lineage. Everything that is not a leaf,
/// a function call or a subquery is a plain composite whose operands are
/// reached through the AST visitor.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ExprKind<'e> {
    Column(&'e [Ident]),
    Literal,
    /// T-SQL `@variable`; carries no base-table data.
    Variable,
    Function(&'e Function),
    Subquery,
    Composite,
}

pub(crate) fn classify(expr: &Expr) -> ExprKind<'_> {
    match expr {
        Expr::Identifier(ident) if is_local_variable(ident) => ExprKind::Variable,
        Expr::Identifier(ident) => ExprKind::Column(std::slice::from_ref(ident)),
        Expr::CompoundIdentifier(idents) => ExprKind::Column(idents),
        Expr::Value(_) | Expr::TypedString { .. } | Expr::IntroducedString { .. } => {
            ExprKind::Literal
        }
        Expr::Function(function) => ExprKind::Function(function),
        Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. } => ExprKind::Subquery,
        _ => ExprKind::Composite,
    }
}

/// The datepart keyword of `DATEADD(day, ...)` and friends. The parser reads
/// it as a bare identifier; it names no column.
pub(crate) fn datepart_argument(function: &Function) -> Option<&Expr> {
    let name = function.name.0.last()?;
    if !DATEPART_FUNCTIONS
        .iter()
        .any(|f| name.value.eq_ignore_ascii_case(f))
    {
        return None;
    }
    let FunctionArguments::List(list) = &function.args else {
        return None;
    };
    match list.args.first()? {
        FunctionArg::Unnamed(FunctionArgExpr::Expr(expr @ Expr::Identifier(ident)))
            if ident.quote_style.is_none() =>
        {
            Some(expr)
        }
        _ => None,
    }
}

pub(crate) fn is_local_variable(ident: &Ident) -> bool {
    ident.quote_style.is_none() && ident.value.starts_with('@')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlparser::dialect::MsSqlDialect;
    use sqlparser::parser::Parser;

    fn parse_expr(sql: &str) -> Expr {
        Parser::new(&MsSqlDialect {})
            .try_with_sql(sql)
            .and_then(|mut p| p.parse_expr())
            .unwrap()
    }

    #[test]
    fn test_classify_leaves_and_composites() {
        assert!(matches!(classify(&parse_expr("a")), ExprKind::Column(parts) if parts.len() == 1));
        assert!(matches!(classify(&parse_expr("t.a")), ExprKind::Column(parts) if parts.len() == 2));
        assert!(matches!(classify(&parse_expr("@v")), ExprKind::Variable));
        assert!(matches!(classify(&parse_expr("'x'")), ExprKind::Literal));
        assert!(matches!(classify(&parse_expr("42")), ExprKind::Literal));
        assert!(matches!(classify(&parse_expr("UPPER(a)")), ExprKind::Function(_)));
        assert!(matches!(classify(&parse_expr("(SELECT 1)")), ExprKind::Subquery));
        assert!(matches!(classify(&parse_expr("a + 1")), ExprKind::Composite));
        assert!(matches!(
            classify(&parse_expr("CASE WHEN a > 1 THEN b END")),
            ExprKind::Composite
        ));
    }

    #[test]
    fn test_datepart_argument() {
        let datepart = |sql: &str| match parse_expr(sql) {
            Expr::Function(function) => datepart_argument(&function).map(|e| e.to_string()),
            other => panic!("expected a function call, got {other}"),
        };
        assert_eq!(datepart("DATEADD(day, 1, a)"), Some("day".to_string()));
        assert_eq!(datepart("dbo.DateDiff(month, a, b)"), Some("month".to_string()));
        assert_eq!(datepart("DATEPART([year], a)"), None);
        assert_eq!(datepart("UPPER(a)"), None);
    }

    #[test]
    fn test_quoted_at_sign_is_a_column() {
        assert!(matches!(classify(&parse_expr("[@v]")), ExprKind::Column(_)));
    }
}
