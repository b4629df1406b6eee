//! db-tools command-line interface
//!
//! Exports, diffs and synchronizes database schemas against definition files.

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use db_tools::config::{self, Config, DatabaseConfig};
use db_tools::schema::definition::{self, Format, SchemaDefinition};
use db_tools::schema::{
    add_pattern_tables, build_schema, definition_matcher, to_definition, TableFilter,
};
use db_tools::utils::logging;
use db_tools::{
    compare_schemas, load_definition, BatchReport, CorrectionRegistry, DdlGenerator, Normalizer,
    Platform, SchemaClient,
};

const DEFAULT_CONFIG_FILE: &str = "db-tools.toml";

const EXIT_CHANGES: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "db-tools")]
#[command(about = "Declarative schema management for MySQL and SQLite")]
#[command(version)]
struct Cli {
    /// Database connection URL (overrides config and environment)
    #[arg(short, long, global = true)]
    connection: Option<String>,

    /// .env file, or a directory holding one, to load before resolving the connection
    #[arg(short, long, global = true)]
    env: Option<PathBuf>,

    /// Prefix for DB_* environment variables
    #[arg(long, global = true, default_value = "")]
    env_prefix: String,

    /// Configuration file (defaults to ./db-tools.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage engine for tables whose definition names none
    #[arg(long, global = true)]
    engine: Option<String>,

    /// SQL dialect used when no live connection is involved
    #[arg(long, global = true, value_enum, default_value_t = PlatformArg::Mysql)]
    platform: PlatformArg,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a schema from a definition file or the live database
    Schema {
        /// Definition file to read instead of the live database
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,

        /// Tables to export (default: all)
        tables: Vec<String>,
    },

    /// Print the DDL that turns SOURCE into TARGET
    Diff {
        /// Current schema definition (default: the live database)
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Wanted schema definition (default: the live database)
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Tables to compare (default: all)
        tables: Vec<String>,
    },

    /// Bring the live database in line with a definition file
    Sync {
        /// Wanted schema definition
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Also drop tables that the definition does not declare
        #[arg(long)]
        purge: bool,

        /// Only print the statements; exit 1 when there are any
        #[arg(long)]
        check: bool,

        /// Apply without asking for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Tables to synchronize (default: the tables of the definition)
        tables: Vec<String>,
    },

    /// Synchronize every host of a cluster (DB1_*, DB2_*, ...)
    SyncCluster {
        /// Wanted schema definition
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Print the statements for each host without applying them
        #[arg(long)]
        dry: bool,

        /// Apply without asking for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Tables to synchronize (default: every table the definition matches)
        tables: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
    Toml,
    Sql,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    Mysql,
    Sqlite,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::Mysql => Platform::MySql,
            PlatformArg::Sqlite => Platform::Sqlite,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: cannot start runtime: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    let level = (cli.verbose > 0).then(|| logging::verbosity_level(cli.verbose));
    logging::init_logging(config.logging.as_ref(), level)?;
    config::load_env_file(cli.env.as_deref())?;

    let app = App {
        cli: &cli,
        config: &config,
        registry: CorrectionRegistry::new(),
    };

    match &cli.command {
        Commands::Schema {
            source,
            format,
            tables,
        } => handle_schema(&app, source.as_deref(), *format, tables).await,
        Commands::Diff {
            source,
            target,
            tables,
        } => handle_diff(&app, source.as_deref(), target.as_deref(), tables).await,
        Commands::Sync {
            target,
            purge,
            check,
            yes,
            tables,
        } => {
            let target = app.target_path(target.as_deref())?;
            handle_sync(&app, &target, *purge, *check, *yes, tables).await
        }
        Commands::SyncCluster {
            target,
            dry,
            yes,
            tables,
        } => {
            let target = app.target_path(target.as_deref())?;
            handle_sync_cluster(&app, &target, *dry, *yes, tables).await
        }
    }
}

/// Settings shared by every command
struct App<'a> {
    cli: &'a Cli,
    config: &'a Config,
    registry: CorrectionRegistry,
}

impl App<'_> {
    fn engine(&self) -> Option<&str> {
        self.cli
            .engine
            .as_deref()
            .or(self.config.schema.engine.as_deref())
    }

    fn target_path(&self, target: Option<&Path>) -> anyhow::Result<PathBuf> {
        target
            .map(Path::to_path_buf)
            .or_else(|| self.config.schema.target.as_ref().map(PathBuf::from))
            .ok_or_else(|| anyhow!("no target definition given (use --target or [schema] target)"))
    }

    fn definition(&self, path: &Path) -> anyhow::Result<SchemaDefinition> {
        load_definition(path, self.engine())
            .with_context(|| format!("cannot load definition {}", path.display()))
    }

    /// Connection precedence: --connection, then [database], then the environment
    fn database(&self) -> anyhow::Result<DatabaseConfig> {
        if let Some(url) = &self.cli.connection {
            return Ok(DatabaseConfig::from_url(url));
        }
        if let Some(database) = &self.config.database {
            return Ok(database.clone());
        }
        Ok(DatabaseConfig::from_env(
            &self.cli.env_prefix,
            config::system_env,
        )?)
    }

    async fn client_for(&self, database: &DatabaseConfig) -> anyhow::Result<SchemaClient> {
        Ok(SchemaClient::connect(database, &self.config.schema, &self.registry).await?)
    }

    async fn client(&self) -> anyhow::Result<SchemaClient> {
        self.client_for(&self.database()?).await
    }

    fn normalizer(&self, platform: Platform) -> Normalizer {
        Normalizer::new(platform)
            .with_default_collation(self.config.schema.default_collation.as_deref())
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(config::load_from_file(path)?),
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            Ok(config::load_from_file(Path::new(DEFAULT_CONFIG_FILE))?)
        }
        None => Ok(Config::default()),
    }
}

async fn handle_schema(
    app: &App<'_>,
    source: Option<&Path>,
    format: OutputFormat,
    tables: &[String],
) -> anyhow::Result<ExitCode> {
    let filter = TableFilter::names(tables);
    let (schema, platform) = match source {
        Some(path) => (
            build_schema(&app.definition(path)?, filter)?,
            Platform::from(app.cli.platform),
        ),
        None => {
            let client = app.client().await?;
            (client.introspect(filter).await?, client.platform())
        }
    };

    let out = match format {
        OutputFormat::Sql => {
            let statements = DdlGenerator::new(platform).create_schema_sql(&schema)?;
            render_statements(&statements)
        }
        OutputFormat::Yaml => definition::to_string(&to_definition(&schema), Format::Yaml)?,
        OutputFormat::Json => definition::to_string(&to_definition(&schema), Format::Json)?,
        OutputFormat::Toml => definition::to_string(&to_definition(&schema), Format::Toml)?,
    };
    print!("{}", out);
    Ok(ExitCode::SUCCESS)
}

async fn handle_diff(
    app: &App<'_>,
    source: Option<&Path>,
    target: Option<&Path>,
    tables: &[String],
) -> anyhow::Result<ExitCode> {
    let filter = TableFilter::names(tables);

    let (current, target, platform) = match (source, target) {
        (None, None) => bail!("diff needs --source or --target"),
        (Some(source), Some(target)) => (
            build_schema(&app.definition(source)?, filter)?,
            build_schema(&app.definition(target)?, filter)?,
            Platform::from(app.cli.platform),
        ),
        (Some(source), None) => {
            let client = app.client().await?;
            (
                build_schema(&app.definition(source)?, filter)?,
                client.introspect(filter).await?,
                client.platform(),
            )
        }
        (None, Some(target)) => {
            let client = app.client().await?;
            (
                client.introspect(filter).await?,
                build_schema(&app.definition(target)?, filter)?,
                client.platform(),
            )
        }
    };

    let diff = compare_schemas(&current, &target, filter, &app.normalizer(platform));
    let statements = DdlGenerator::new(platform).generate(&diff)?;
    print!("{}", render_statements(&statements));
    Ok(ExitCode::SUCCESS)
}

async fn handle_sync(
    app: &App<'_>,
    target_path: &Path,
    purge: bool,
    check: bool,
    yes: bool,
    tables: &[String],
) -> anyhow::Result<ExitCode> {
    let target = build_schema(&app.definition(target_path)?, TableFilter::names(tables))?;
    let declared = target.table_names();
    let filter = if !tables.is_empty() {
        TableFilter::Names(tables)
    } else if purge {
        TableFilter::All
    } else {
        TableFilter::Names(&declared)
    };

    let client = app.client().await?;
    let diff = client.diff(&target, filter).await?;
    if diff.is_empty() {
        eprintln!("Database schema is up to date");
        return Ok(ExitCode::SUCCESS);
    }

    let statements = client.generate_sql(&diff)?;
    print!("{}", render_statements(&statements));
    if check {
        return Ok(ExitCode::from(EXIT_CHANGES));
    }
    if !yes && !confirm(&format!("Apply {} statement(s)?", statements.len()))? {
        eprintln!("Aborted");
        return Ok(ExitCode::SUCCESS);
    }

    let report = client.apply(&statements).await;
    print_report(&report);
    Ok(exit_code(&report))
}

async fn handle_sync_cluster(
    app: &App<'_>,
    target_path: &Path,
    dry: bool,
    yes: bool,
    tables: &[String],
) -> anyhow::Result<ExitCode> {
    let definition = app.definition(target_path)?;
    let matcher = definition_matcher(&definition)?;
    let base_target = build_schema(&definition, TableFilter::names(tables))?;
    let filter = if tables.is_empty() {
        TableFilter::Patterns(&matcher)
    } else {
        TableFilter::Names(tables)
    };

    let hosts = DatabaseConfig::cluster_from_env(&app.cli.env_prefix, config::system_env)?;
    if hosts.is_empty() {
        bail!(
            "no cluster hosts configured (set {}DB1_HOST or {}DB1_DSN)",
            app.cli.env_prefix,
            app.cli.env_prefix
        );
    }

    let mut failed = false;
    for host in &hosts {
        let name = host.describe();
        println!("-- {}", name);

        let client = app
            .client_for(host)
            .await
            .with_context(|| format!("host {}", name))?;
        let current = client.introspect(filter).await?;
        let mut target = base_target.clone();
        let added = add_pattern_tables(&mut target, &current, &matcher)?;
        tracing::debug!(host = %name, tables = ?added, "Added wildcard tables to target");

        let diff = client.diff_from(&current, &target, filter);
        let statements = client.generate_sql(&diff)?;
        print!("{}", render_statements(&statements));
        if statements.is_empty() || dry {
            continue;
        }
        if !yes && !confirm(&format!("Apply {} statement(s) on {}?", statements.len(), name))? {
            eprintln!("Skipped {}", name);
            continue;
        }

        let report = client.apply(&statements).await;
        print_report(&report);
        failed |= !report.is_success();
    }

    Ok(if failed {
        ExitCode::from(EXIT_CHANGES)
    } else {
        ExitCode::SUCCESS
    })
}

fn render_statements(statements: &[String]) -> String {
    statements.iter().map(|s| format!("{};\n", s)).collect()
}

fn print_report(report: &BatchReport) {
    for failure in &report.failures {
        eprintln!(
            "Statement {} failed: {}\n  {}",
            failure.index + 1,
            failure.error,
            failure.statement
        );
    }
    eprintln!(
        "Executed {} of {} statement(s), {} failed",
        report.executed,
        report.total(),
        report.failures.len()
    );
}

fn exit_code(report: &BatchReport) -> ExitCode {
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_CHANGES)
    }
}

/// Ask a yes/no question; a non-interactive stdin counts as yes
fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(true);
    }
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
