use crate::error::{Result, SpanError};
use crate::span::MaskingLevel;
use sqlparser::ast::ObjectName;
use std::collections::HashMap;

const BUILTIN_NEVER_CHANGE: &[(&str, MaskingLevel)] = &[
    ("count", MaskingLevel::None),
    ("count_big", MaskingLevel::None),
    ("approx_count_distinct", MaskingLevel::None),
    ("grouping", MaskingLevel::None),
    ("grouping_id", MaskingLevel::None),
    ("checksum", MaskingLevel::Partial),
    ("binary_checksum", MaskingLevel::Partial),
    ("hashbytes", MaskingLevel::Partial),
    ("md5", MaskingLevel::Partial),
    ("sha1", MaskingLevel::Partial),
    ("sha2", MaskingLevel::Partial),
    ("sha256", MaskingLevel::Partial),
];

/// Functions whose result masking level does not depend on their operands.
///
/// Every function not listed here follows the generic transmission rule.
/// Names are matched case-insensitively on the last part of the function name.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionRegistry {
    /// Lower-cased function name -> fixed masking level of its result.
    pub functions: HashMap<String, MaskingLevel>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry holding the built-in aggregate and hashing functions.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (name, level) in BUILTIN_NEVER_CHANGE {
            registry.register(name, *level);
        }
        registry
    }

    /// Load entries from a JSON object of `name -> level`; loaded entries win.
    pub fn load_from_json(&mut self, json: &str) -> Result<()> {
        let parsed: HashMap<String, MaskingLevel> = serde_json::from_str(json)
            .map_err(|e| SpanError::Config(format!("invalid function registry JSON: {e}")))?;
        for (name, level) in parsed {
            self.register(&name, level);
        }
        Ok(())
    }

    pub fn register(&mut self, name: &str, level: MaskingLevel) {
        self.functions.insert(name.to_lowercase(), level);
    }

    pub fn register_if_absent(&mut self, name: &str, level: MaskingLevel) {
        self.functions.entry(name.to_lowercase()).or_insert(level);
    }

    pub fn get(&self, name: &str) -> Option<MaskingLevel> {
        self.functions.get(&name.to_lowercase()).copied()
    }

    pub(crate) fn never_change_level(&self, name: &ObjectName) -> Option<MaskingLevel> {
        name.0.last().and_then(|ident| self.get(&ident.value))
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
