use crate::dialect::SqlDialect;
use crate::engine::{Limits, QuerySpanEngine};
use crate::registry::FunctionRegistry;
use crate::span::MaskingLevel;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub catalog: Option<CatalogConfig>,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default)]
    pub dialect: SqlDialect,
    #[serde(default)]
    pub connected_database: String,
    #[serde(default)]
    pub connected_schema: String,
    #[serde(default)]
    pub ignore_case_sensitive: bool,
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
    #[serde(default = "default_max_fixed_point_iterations")]
    pub max_fixed_point_iterations: usize,
    /// Extra never-change functions; entries override the built-ins.
    #[serde(default)]
    pub never_change_functions: HashMap<String, MaskingLevel>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    /// When unset, logs only go to stderr.
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dialect: SqlDialect::default(),
            connected_database: String::new(),
            connected_schema: String::new(),
            ignore_case_sensitive: false,
            max_nesting_depth: default_max_nesting_depth(),
            max_fixed_point_iterations: default_max_fixed_point_iterations(),
            never_change_functions: HashMap::new(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: default_log_level(),
            max_log_files: default_max_log_files(),
        }
    }
}

fn default_max_nesting_depth() -> usize {
    Limits::default().max_nesting_depth
}

fn default_max_fixed_point_iterations() -> usize {
    Limits::default().max_fixed_point_iterations
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    7
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }
}

impl EngineConfig {
    pub fn build_engine(&self) -> QuerySpanEngine {
        let mut functions = FunctionRegistry::builtin();
        for (name, level) in &self.never_change_functions {
            functions.register(name, *level);
        }
        QuerySpanEngine {
            dialect: self.dialect,
            functions,
            limits: Limits {
                max_nesting_depth: self.max_nesting_depth,
                max_fixed_point_iterations: self.max_fixed_point_iterations,
            },
        }
    }
}
