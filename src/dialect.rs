use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    Dialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SnowflakeDialect,
};
use std::fmt;
use std::str::FromStr;

/// SQL flavour a statement is written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Mssql,
    Postgres,
    Mysql,
    Snowflake,
    Generic,
}

impl SqlDialect {
    pub fn parser_dialect(&self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Mssql => Box::new(MsSqlDialect {}),
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SqlDialect::Mysql => Box::new(MySqlDialect {}),
            SqlDialect::Snowflake => Box::new(SnowflakeDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
        }
    }

    fn system_schemas(&self) -> &'static [&'static str] {
        match self {
            SqlDialect::Mssql => &["sys", "information_schema"],
            SqlDialect::Postgres => &["pg_catalog", "information_schema", "pg_toast"],
            SqlDialect::Mysql => &["information_schema", "performance_schema", "mysql", "sys"],
            SqlDialect::Snowflake => &["information_schema", "account_usage"],
            SqlDialect::Generic => &["information_schema"],
        }
    }

    fn system_databases(&self) -> &'static [&'static str] {
        match self {
            SqlDialect::Snowflake => &["snowflake"],
            _ => &[],
        }
    }

    /// Catalog objects reachable without any qualifier.
    fn system_tables(&self) -> &'static [&'static str] {
        match self {
            SqlDialect::Mssql => &[
                "sysobjects",
                "syscolumns",
                "sysindexes",
                "sysusers",
                "sysdatabases",
            ],
            SqlDialect::Postgres => &[
                "pg_database",
                "pg_class",
                "pg_namespace",
                "pg_attribute",
                "pg_proc",
                "pg_type",
                "pg_roles",
                "pg_user",
                "pg_tables",
                "pg_views",
                "pg_indexes",
                "pg_settings",
                "pg_stat_activity",
            ],
            _ => &[],
        }
    }

    pub fn is_system_schema(&self, schema: &str) -> bool {
        contains_ignore_case(self.system_schemas(), schema)
    }

    pub fn is_system_database(&self, database: &str) -> bool {
        contains_ignore_case(self.system_databases(), database)
    }

    pub fn is_system_table(&self, table: &str) -> bool {
        contains_ignore_case(self.system_tables(), table)
    }
}

fn contains_ignore_case(list: &[&str], name: &str) -> bool {
    list.iter().any(|s| s.eq_ignore_ascii_case(name))
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SqlDialect::Mssql => "mssql",
            SqlDialect::Postgres => "postgres",
            SqlDialect::Mysql => "mysql",
            SqlDialect::Snowflake => "snowflake",
            SqlDialect::Generic => "generic",
        };
        f.write_str(s)
    }
}

impl FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mssql" | "tsql" | "sqlserver" => Ok(SqlDialect::Mssql),
            "postgres" | "postgresql" | "pg" => Ok(SqlDialect::Postgres),
            "mysql" => Ok(SqlDialect::Mysql),
            "snowflake" => Ok(SqlDialect::Snowflake),
            "generic" => Ok(SqlDialect::Generic),
            other => Err(format!("unknown dialect {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_system_objects_per_dialect() {
        assert!(SqlDialect::Mssql.is_system_schema("SYS"));
        assert!(SqlDialect::Mssql.is_system_schema("INFORMATION_SCHEMA"));
        assert!(!SqlDialect::Mssql.is_system_schema("dbo"));
        assert!(SqlDialect::Postgres.is_system_table("pg_database"));
        assert!(SqlDialect::Snowflake.is_system_database("SNOWFLAKE"));
        assert!(!SqlDialect::Mysql.is_system_table("users"));
    }

    #[test]
    fn test_parse_dialect_names() {
        assert_eq!("tsql".parse::<SqlDialect>(), Ok(SqlDialect::Mssql));
        assert_eq!("PostgreSQL".parse::<SqlDialect>(), Ok(SqlDialect::Postgres));
        assert!("oracle".parse::<SqlDialect>().is_err());
        assert_eq!(SqlDialect::Snowflake.to_string(), "snowflake");
    }
}
