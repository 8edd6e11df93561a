use anyhow::Context;
use itertools::Itertools;
use query_span::config::{AppConfig, LogConfig};
use query_span::{InMemoryCatalog, QuerySpan, QuerySpanEngine, SqlDialect};
use std::env;
use std::fs;
use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_appender::non_blocking::WorkerGuard;

const LOG_FILE: &str = "query_span.log";

struct CliOptions {
    json: bool,
    pretty: bool,
    inputs: Vec<String>,
}

fn main() {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let mut config = match take_value(&mut args, &["--config"]) {
        Some(path) => match AppConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                std::process::exit(2);
            }
        },
        None => AppConfig::default(),
    };

    let _guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            std::process::exit(2);
        }
    };

    if let Some(path) = take_value(&mut args, &["--catalog", "-c"]) {
        config.catalog = Some(query_span::config::CatalogConfig { path: path.into() });
    }
    if let Some(database) = take_value(&mut args, &["--database", "-d"]) {
        config.engine.connected_database = database;
    }
    if let Some(schema) = take_value(&mut args, &["--schema", "-s"]) {
        config.engine.connected_schema = schema;
    }
    if let Some(dialect) = take_value(&mut args, &["--dialect"]) {
        match dialect.parse::<SqlDialect>() {
            Ok(dialect) => config.engine.dialect = dialect,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(2);
            }
        }
    }
    if take_flag(&mut args, &["--ignore-case", "-i"]) {
        config.engine.ignore_case_sensitive = true;
    }
    let options = CliOptions {
        pretty: take_flag(&mut args, &["--pretty", "-p"]),
        json: take_flag(&mut args, &["--json", "-j"]),
        inputs: args,
    };

    let catalog = match &config.catalog {
        Some(catalog) => match InMemoryCatalog::from_file(&catalog.path) {
            Ok(loaded) => loaded,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(2);
            }
        },
        None => {
            tracing::warn!("No catalog given, every table reference will fail to resolve");
            InMemoryCatalog::new()
        }
    };

    run_cli_mode(&config, &catalog, options);
}

fn take_flag(args: &mut Vec<String>, names: &[&str]) -> bool {
    if let Some(pos) = args.iter().position(|a| names.contains(&a.as_str())) {
        args.remove(pos);
        true
    } else {
        false
    }
}

fn take_value(args: &mut Vec<String>, names: &[&str]) -> Option<String> {
    let pos = args.iter().position(|a| names.contains(&a.as_str()))?;
    args.remove(pos);
    if pos < args.len() {
        Some(args.remove(pos))
    } else {
        eprintln!("Missing value for {}", names[0]);
        std::process::exit(2);
    }
}

fn run_cli_mode(config: &AppConfig, catalog: &InMemoryCatalog, options: CliOptions) {
    let engine = config.engine.build_engine();

    if options.inputs.is_empty() || (options.inputs.len() == 1 && options.inputs[0] == "-") {
        let mut buf = String::new();
        if let Err(e) = io::stdin().read_to_string(&mut buf) {
            eprintln!("Failed to read stdin: {}", e);
            std::process::exit(2);
        }
        if let Err(e) = run_once(&engine, config, catalog, &buf, &options) {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
        return;
    }

    for path in &options.inputs {
        match fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!("Evaluating {}", path);
                if let Err(e) = run_once(&engine, config, catalog, &contents, &options) {
                    eprintln!("Error in {}: {:#}", path, e);
                    std::process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("Failed to read {}: {}", path, e);
                std::process::exit(2);
            }
        }
    }
}

/// Evaluates every statement of a script, one span per statement.
fn run_once(
    engine: &QuerySpanEngine,
    config: &AppConfig,
    catalog: &InMemoryCatalog,
    sql: &str,
    options: &CliOptions,
) -> anyhow::Result<()> {
    let statements = engine.parse(sql)?;
    let mut spans = Vec::with_capacity(statements.len());
    for (index, statement) in statements.iter().enumerate() {
        let span = engine
            .get_statement_span(
                catalog,
                &config.engine.connected_database,
                &config.engine.connected_schema,
                statement,
                config.engine.ignore_case_sensitive,
            )
            .with_context(|| format!("statement {}", index + 1))?;
        spans.push(span);
    }

    if options.json {
        if options.pretty {
            println!("{}", serde_json::to_string_pretty(&spans)?);
        } else {
            println!("{}", serde_json::to_string(&spans)?);
        }
    } else {
        for (index, span) in spans.iter().enumerate() {
            if index > 0 {
                println!();
            }
            for line in render_span(span) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

fn render_span(span: &QuerySpan) -> Vec<String> {
    let mut lines: Vec<String> = span
        .results
        .iter()
        .map(|result| {
            format!(
                "{} <- {} [{}]",
                result.name,
                result.source_columns.iter().join(", "),
                result.masking_attribute.level
            )
        })
        .collect();
    if !span.predicate_columns.is_empty() {
        lines.push(format!(
            "predicates: {}",
            span.predicate_columns.iter().join(", ")
        ));
    }
    lines
}

/// Logs go to stderr, and additionally to a daily rotated file when a log
/// directory is configured.
fn init_logging(config: &LogConfig) -> anyhow::Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_level = config
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let Some(log_dir) = &config.log_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(io::stderr))
            .init();
        return Ok(None);
    };

    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir))?;
    let file_writer = SharedLogWriter::new(log_dir, config.max_log_files)?;
    cleanup_old_logs(log_dir, config.max_log_files)?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(Some(guard))
}

struct SharedLogWriter {
    state: Arc<Mutex<WriterState>>,
}

impl SharedLogWriter {
    fn new(log_dir: &str, max_files: usize) -> anyhow::Result<Self> {
        let state = WriterState::new(log_dir, max_files)?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }
}

impl Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("log writer poisoned"))?;
        state.ensure_current().map_err(io::Error::other)?;
        state.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("log writer poisoned"))?;
        state.file.flush()
    }
}

struct WriterState {
    log_dir: PathBuf,
    active_path: PathBuf,
    file: fs::File,
    current_date: chrono::NaiveDate,
    max_files: usize,
}

impl WriterState {
    fn new(log_dir: &str, max_files: usize) -> anyhow::Result<Self> {
        let log_dir = PathBuf::from(log_dir);
        let active_path = log_dir.join(LOG_FILE);
        let file = open_append(&active_path)?;

        // A non-empty active file keeps the date it was last written on.
        let metadata = fs::metadata(&active_path)?;
        let current_date = match metadata.modified() {
            Ok(modified) if metadata.len() > 0 => {
                chrono::DateTime::<chrono::Local>::from(modified).date_naive()
            }
            _ => chrono::Local::now().date_naive(),
        };

        let mut state = Self {
            log_dir,
            active_path,
            file,
            current_date,
            max_files,
        };
        state.ensure_current()?;
        Ok(state)
    }

    fn ensure_current(&mut self) -> anyhow::Result<()> {
        let today = chrono::Local::now().date_naive();
        if today != self.current_date {
            self.rotate_to(today)?;
        }
        Ok(())
    }

    fn rotate_to(&mut self, new_date: chrono::NaiveDate) -> anyhow::Result<()> {
        self.file.flush()?;
        if self.active_path.exists() {
            let archive_path = self.log_dir.join(format!(
                "{}.{}",
                LOG_FILE,
                self.current_date.format("%Y-%m-%d")
            ));
            fs::rename(&self.active_path, &archive_path)?;
            compress_log_file(&archive_path)?;
        }
        self.file = open_append(&self.active_path)?;
        self.current_date = new_date;
        cleanup_old_logs(&self.log_dir, self.max_files)?;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Compresses stray dated logs and keeps the newest `max_files` archives.
fn cleanup_old_logs(log_dir: impl AsRef<Path>, max_files: usize) -> anyhow::Result<()> {
    let log_path = log_dir.as_ref();
    if !log_path.exists() {
        return Ok(());
    }

    let prefix = format!("{}.", LOG_FILE);
    for entry in fs::read_dir(log_path)? {
        let path = entry?.path();
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if filename.starts_with(&prefix) && !filename.ends_with(".gz") {
            if let Err(e) = compress_log_file(&path) {
                eprintln!("Failed to compress log file {:?}: {}", path, e);
            }
        }
    }

    let mut archives: Vec<_> = fs::read_dir(log_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    // Newest first.
    archives.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in archives.iter().skip(max_files) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to remove old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}

fn compress_log_file(path: &Path) -> anyhow::Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let buffer = fs::read(path)?;
    let mut gz_path = path.as_os_str().to_owned();
    gz_path.push(".gz");
    let mut encoder = GzEncoder::new(fs::File::create(&gz_path)?, Compression::default());
    encoder.write_all(&buffer)?;
    encoder.finish()?;
    fs::remove_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use query_span::{DatabaseMetadata, MaskingLevel};

    #[test]
    fn test_flags_are_consumed() {
        let mut args: Vec<String> = ["-d", "db", "--json", "q.sql"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(take_value(&mut args, &["--database", "-d"]), Some("db".to_string()));
        assert!(take_flag(&mut args, &["--json", "-j"]));
        assert!(!take_flag(&mut args, &["--pretty", "-p"]));
        assert_eq!(args, vec!["q.sql".to_string()]);
    }

    #[test]
    fn test_render_span() -> anyhow::Result<()> {
        let catalog = InMemoryCatalog::new().with_database(DatabaseMetadata::new("db").with_table(
            "dbo",
            "t",
            &[("a", MaskingLevel::Full), ("b", MaskingLevel::None)],
        ));
        let span = query_span::get_query_span(&catalog, "db", "dbo", "SELECT a FROM t WHERE b = 1", false)?;
        assert_eq!(
            render_span(&span),
            vec![
                "a <- db.dbo.t.a [FULL]".to_string(),
                "predicates: db.dbo.t.b".to_string(),
            ]
        );
        Ok(())
    }
}
