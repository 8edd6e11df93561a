use serde::{Deserialize, Serialize};
use std::collections::btree_set;
use std::collections::BTreeSet;
use std::fmt;

/// A fully qualified base-table column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server: String,
    pub database: String,
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(database: &str, schema: &str, table: &str, column: &str) -> Self {
        Self {
            server: String::new(),
            database: database.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            &self.server,
            &self.database,
            &self.schema,
            &self.table,
            &self.column,
        ];
        let mut first = true;
        for part in parts.into_iter().filter(|p| !p.is_empty()) {
            if !first {
                f.write_str(".")?;
            }
            f.write_str(part)?;
            first = false;
        }
        Ok(())
    }
}

/// The base columns a value may carry data from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceColumnSet(BTreeSet<ColumnRef>);

impl SourceColumnSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: ColumnRef) -> bool {
        self.0.insert(column)
    }

    pub fn contains(&self, column: &ColumnRef) -> bool {
        self.0.contains(column)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, ColumnRef> {
        self.0.iter()
    }

    pub fn is_subset(&self, other: &SourceColumnSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Adds every column of `other`, returning whether the set grew.
    pub fn merge(&mut self, other: &SourceColumnSet) -> bool {
        let before = self.0.len();
        self.0.extend(other.0.iter().cloned());
        self.0.len() != before
    }

    pub fn union(a: &SourceColumnSet, b: &SourceColumnSet) -> SourceColumnSet {
        let mut merged = a.clone();
        merged.merge(b);
        merged
    }
}

impl FromIterator<ColumnRef> for SourceColumnSet {
    fn from_iter<I: IntoIterator<Item = ColumnRef>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<ColumnRef> for SourceColumnSet {
    fn extend<I: IntoIterator<Item = ColumnRef>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl<'a> IntoIterator for &'a SourceColumnSet {
    type Item = &'a ColumnRef;
    type IntoIter = btree_set::Iter<'a, ColumnRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for SourceColumnSet {
    type Item = ColumnRef;
    type IntoIter = btree_set::IntoIter<ColumnRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Sensitivity classification, ordered from least to most restrictive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum MaskingLevel {
    #[default]
    None,
    Partial,
    Full,
}

impl fmt::Display for MaskingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MaskingLevel::None => "NONE",
            MaskingLevel::Partial => "PARTIAL",
            MaskingLevel::Full => "FULL",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MaskingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(MaskingLevel::None),
            "PARTIAL" => Ok(MaskingLevel::Partial),
            "FULL" => Ok(MaskingLevel::Full),
            other => Err(format!("unknown masking level {other:?}")),
        }
    }
}

/// Masking level of a value plus whether further operands can still change it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskingAttribute {
    pub level: MaskingLevel,
    /// Set on results of never-change functions; their level ignores operands.
    #[serde(default)]
    pub never_change: bool,
}

impl MaskingAttribute {
    pub fn new(level: MaskingLevel) -> Self {
        Self {
            level,
            never_change: false,
        }
    }

    pub fn fixed(level: MaskingLevel) -> Self {
        Self {
            level,
            never_change: true,
        }
    }

    /// No operand can change this attribute any more: it is either fixed or
    /// already at the most restrictive level.
    pub fn is_never_change(&self) -> bool {
        self.never_change || self.level == MaskingLevel::Full
    }

    /// Transmission rule for operands of one expression. Returns whether
    /// `self` changed.
    pub fn transmitted_by(&mut self, operand: &MaskingAttribute) -> bool {
        if self.is_never_change() || operand.level <= self.level {
            return false;
        }
        self.level = operand.level;
        true
    }

    /// Combination of two alternatives for the same output column (set
    /// operation branches, fixed-point iterations).
    pub fn join(&mut self, other: &MaskingAttribute) -> bool {
        let level = self.level.max(other.level);
        let never_change = self.never_change && other.never_change;
        let changed = level != self.level || never_change != self.never_change;
        self.level = level;
        self.never_change = never_change;
        changed
    }
}

/// One output column of a query block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpanResult {
    pub name: String,
    pub source_columns: SourceColumnSet,
    pub masking_attribute: MaskingAttribute,
}

impl QuerySpanResult {
    pub fn new(name: impl Into<String>, source_columns: SourceColumnSet, masking_attribute: MaskingAttribute) -> Self {
        Self {
            name: name.into(),
            source_columns,
            masking_attribute,
        }
    }

    /// Result with no lineage, used for constructs that are reported but not analysed.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self::new(name, SourceColumnSet::new(), MaskingAttribute::default())
    }

    /// Folds another alternative for this column into it, keeping the name.
    pub fn merge(&mut self, other: &QuerySpanResult) -> bool {
        let grew = self.source_columns.merge(&other.source_columns);
        let raised = self.masking_attribute.join(&other.masking_attribute);
        grew || raised
    }
}

/// Lineage of one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpan {
    pub results: Vec<QuerySpanResult>,
    /// Every base column read by the statement, projected or filtered on.
    pub source_columns: SourceColumnSet,
    /// Base columns read only by WHERE / HAVING / JOIN conditions.
    pub predicate_columns: SourceColumnSet,
}

impl QuerySpan {
    pub fn new(results: Vec<QuerySpanResult>, predicate_columns: SourceColumnSet) -> Self {
        let mut source_columns = predicate_columns.clone();
        for result in &results {
            source_columns.merge(&result.source_columns);
        }
        Self {
            results,
            source_columns,
            predicate_columns,
        }
    }
}
