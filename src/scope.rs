use crate::names::NameMatcher;
use crate::table_source::PseudoTable;
use std::rc::Rc;

/// CTEs visible at one point of a statement, oldest first.
///
/// Pushing returns a new scope; the receiver is left untouched, so leaving a
/// nesting level only means dropping the scope built inside it.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    ctes: Vec<Rc<PseudoTable>>,
}

impl Scope {
    pub(crate) fn push(&self, table: PseudoTable) -> Scope {
        let mut ctes = self.ctes.clone();
        ctes.push(Rc::new(table));
        Scope { ctes }
    }

    /// Nearest declaration wins.
    pub(crate) fn lookup(&self, names: NameMatcher, name: &str) -> Option<&PseudoTable> {
        self.ctes
            .iter()
            .rev()
            .find(|cte| names.eq(name, &cte.name))
            .map(|cte| cte.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::QuerySpanResult;
    use pretty_assertions::assert_eq;

    fn cte(name: &str, column: &str) -> PseudoTable {
        PseudoTable::new(name, vec![QuerySpanResult::placeholder(column)])
    }

    #[test]
    fn test_nearest_cte_shadows_older_ones() {
        let names = NameMatcher::new(true);
        let outer = Scope::default().push(cte("t", "outer_col"));
        let inner = outer.push(cte("T", "inner_col"));

        assert_eq!(inner.lookup(names, "t").unwrap().columns[0].name, "inner_col");
        assert_eq!(outer.lookup(names, "t").unwrap().columns[0].name, "outer_col");
        assert!(inner.lookup(names, "missing").is_none());
    }
}
