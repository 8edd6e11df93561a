use crate::catalog::{CatalogAccessor, MetadataCache};
use crate::engine::QuerySpanEngine;
use crate::error::{Result, SpanError};
use crate::names::NameMatcher;
use crate::scope::Scope;
use crate::span::SourceColumnSet;
use crate::table_source::{PseudoTable, TableSource};
use sqlparser::ast::WindowSpec;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// State shared by every evaluator of one statement.
pub(crate) struct Session<'s> {
    pub(crate) engine: &'s QuerySpanEngine,
    pub(crate) catalog: MetadataCache<'s>,
    pub(crate) connected_database: &'s str,
    pub(crate) connected_schema: &'s str,
    pub(crate) names: NameMatcher,
    predicates: RefCell<SourceColumnSet>,
}

impl<'s> Session<'s> {
    pub(crate) fn new(
        engine: &'s QuerySpanEngine,
        catalog: &'s dyn CatalogAccessor,
        connected_database: &'s str,
        connected_schema: &'s str,
        ignore_case_sensitive: bool,
    ) -> Self {
        Self {
            engine,
            catalog: MetadataCache::new(catalog),
            connected_database,
            connected_schema,
            names: NameMatcher::new(ignore_case_sensitive),
            predicates: RefCell::new(SourceColumnSet::new()),
        }
    }

    pub(crate) fn add_predicates(&self, columns: &SourceColumnSet) {
        self.predicates.borrow_mut().merge(columns);
    }

    pub(crate) fn take_predicates(&self) -> SourceColumnSet {
        self.predicates.take()
    }
}

/// Evaluation context for one nesting level.
///
/// Entering a subquery, derived table or CTE body clones the context with the
/// appropriate universes; nothing a child does is visible to its parent.
#[derive(Clone)]
pub(crate) struct Extractor<'s> {
    pub(crate) session: &'s Session<'s>,
    pub(crate) scope: Scope,
    /// FROM-clause universe of the current query block.
    pub(crate) from: Rc<Vec<TableSource>>,
    /// Universes of the enclosing blocks, nearest first. Read-only; used for
    /// correlated references.
    pub(crate) outer: Rc<Vec<TableSource>>,
    pub(crate) windows: Rc<HashMap<String, WindowSpec>>,
    depth: usize,
}

impl<'s> Extractor<'s> {
    pub(crate) fn new(session: &'s Session<'s>) -> Self {
        Self {
            session,
            scope: Scope::default(),
            from: Rc::new(Vec::new()),
            outer: Rc::new(Vec::new()),
            windows: Rc::new(HashMap::new()),
            depth: 0,
        }
    }

    pub(crate) fn names(&self) -> NameMatcher {
        self.session.names
    }

    /// One more level of query nesting.
    pub(crate) fn descend(&self) -> Result<Self> {
        let limit = self.session.engine.limits.max_nesting_depth;
        if self.depth >= limit {
            return Err(SpanError::NestingTooDeep { limit });
        }
        let mut next = self.clone();
        next.depth += 1;
        Ok(next)
    }

    /// Context for a subquery inside an expression of the current block: same
    /// CTEs, fresh FROM universe, the current universe becomes the nearest
    /// outer one.
    pub(crate) fn subquery(&self) -> Self {
        let mut outer = Vec::with_capacity(self.from.len() + self.outer.len());
        outer.extend(self.from.iter().cloned());
        outer.extend(self.outer.iter().cloned());
        Self {
            from: Rc::new(Vec::new()),
            outer: Rc::new(outer),
            windows: Rc::new(HashMap::new()),
            ..self.clone()
        }
    }

    /// Context for a derived table or CTE body: siblings in the same FROM
    /// clause are not visible.
    pub(crate) fn derived(&self) -> Self {
        Self {
            from: Rc::new(Vec::new()),
            windows: Rc::new(HashMap::new()),
            ..self.clone()
        }
    }

    /// Context for `LATERAL (...)` and the right side of `APPLY`, which may
    /// read the relations to their left.
    pub(crate) fn lateral(&self, preceding: &[TableSource]) -> Self {
        let mut outer = preceding.to_vec();
        outer.extend(self.outer.iter().cloned());
        Self {
            from: Rc::new(Vec::new()),
            outer: Rc::new(outer),
            windows: Rc::new(HashMap::new()),
            ..self.clone()
        }
    }

    pub(crate) fn enter_block(
        &self,
        universe: Vec<TableSource>,
        windows: HashMap<String, WindowSpec>,
    ) -> Self {
        Self {
            from: Rc::new(universe),
            windows: Rc::new(windows),
            ..self.clone()
        }
    }

    pub(crate) fn push_cte(&self, table: PseudoTable) -> Self {
        Self {
            scope: self.scope.push(table),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Limits;
    use crate::span::QuerySpanResult;
    use crate::test_support::fixture_catalog;
    use pretty_assertions::assert_eq;

    fn pseudo(name: &str) -> TableSource {
        TableSource::Pseudo(PseudoTable::new(name, vec![QuerySpanResult::placeholder("x")]))
    }

    #[test]
    fn test_subquery_sees_enclosing_universes_nearest_first() {
        let engine = QuerySpanEngine::default();
        let catalog = fixture_catalog();
        let session = Session::new(&engine, &catalog, "db", "dbo", false);

        let outer = Extractor::new(&session).enter_block(vec![pseudo("outer")], HashMap::new());
        let middle = outer.subquery().enter_block(vec![pseudo("middle")], HashMap::new());
        let inner = middle.subquery();

        assert!(inner.from.is_empty());
        let names: Vec<&str> = inner.outer.iter().map(|t| t.table_name()).collect();
        assert_eq!(names, vec!["middle", "outer"]);
        assert!(outer.outer.is_empty());
    }

    #[test]
    fn test_derived_context_hides_siblings() {
        let engine = QuerySpanEngine::default();
        let catalog = fixture_catalog();
        let session = Session::new(&engine, &catalog, "db", "dbo", false);

        let block = Extractor::new(&session).enter_block(vec![pseudo("left")], HashMap::new());
        let derived = block.derived();
        assert!(derived.from.is_empty());
        assert!(derived.outer.is_empty());

        let lateral = block.lateral(&block.from);
        assert_eq!(lateral.outer.len(), 1);
    }

    #[test]
    fn test_descend_stops_at_the_limit() {
        let engine = QuerySpanEngine {
            limits: Limits {
                max_nesting_depth: 2,
                ..Limits::default()
            },
            ..QuerySpanEngine::default()
        };
        let catalog = fixture_catalog();
        let session = Session::new(&engine, &catalog, "", "", false);

        let result = Extractor::new(&session)
            .descend()
            .and_then(|e| e.descend())
            .and_then(|e| e.descend());
        assert!(matches!(result, Err(SpanError::NestingTooDeep { limit: 2 })));
    }

    #[test]
    fn test_predicates_accumulate_across_contexts() {
        let engine = QuerySpanEngine::default();
        let catalog = fixture_catalog();
        let session = Session::new(&engine, &catalog, "", "", false);
        let columns: SourceColumnSet = [crate::span::ColumnRef::new("db", "dbo", "MyTable1", "a")]
            .into_iter()
            .collect();

        session.add_predicates(&columns);
        session.add_predicates(&columns);
        assert_eq!(session.take_predicates(), columns);
        assert!(session.take_predicates().is_empty());
    }
}
