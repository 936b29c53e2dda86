//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use backfill_core::pipeline::{BackfillResult, ProgressReporter, run_backfill};
use backfill_shared::{AppConfig, BackfillConfig, init_config, load_config, load_config_from};
use backfill_storage::{Storage, parse_documents};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// backfill: copy a missing attribute onto records from a related collection.
#[derive(Parser)]
#[command(
    name = "backfill",
    version,
    about = "Backfill a missing attribute on a document collection from a reference collection.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.backfill/backfill.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the backfill once.
    Run {
        /// Database file.
        #[arg(long, env = "BACKFILL_DB")]
        db: Option<String>,

        /// Collection whose records are missing the attribute.
        #[arg(long, env = "BACKFILL_SOURCE_COLLECTION")]
        source: Option<String>,

        /// Collection the owner keys point into.
        #[arg(long, env = "BACKFILL_REFERENCE_COLLECTION")]
        reference: Option<String>,

        /// Log the planned updates without committing them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Load a JSON array of documents into a collection.
    Import {
        /// Target collection.
        #[arg(short, long)]
        collection: String,

        /// JSON file containing an array of objects.
        file: PathBuf,

        /// Database file.
        #[arg(long, env = "BACKFILL_DB")]
        db: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "backfill=info",
        1 => "backfill=debug",
        _ => "backfill=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            db,
            source,
            reference,
            dry_run,
        } => {
            let overrides = RunOverrides {
                db,
                source,
                reference,
                dry_run,
            };
            cmd_run(config_path, overrides).await
        }
        Command::Import {
            collection,
            file,
            db,
        } => cmd_import(config_path, &collection, &file, db.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Load the config file named by `--config`, or the default one.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

/// Flag values that override the config file.
struct RunOverrides {
    db: Option<String>,
    source: Option<String>,
    reference: Option<String>,
    dry_run: bool,
}

impl RunOverrides {
    fn apply(self, app: &AppConfig) -> BackfillConfig {
        let mut config = BackfillConfig::from(app);
        if let Some(db) = self.db {
            config.db_path = PathBuf::from(db);
        }
        if let Some(source) = self.source {
            config.source_collection = source;
        }
        if let Some(reference) = self.reference {
            config.reference_collection = reference;
        }
        config.dry_run = self.dry_run;
        config
    }
}

async fn cmd_run(config_path: Option<&Path>, overrides: RunOverrides) -> Result<()> {
    let app = resolve_config(config_path)?;
    let config = overrides.apply(&app);

    info!(
        db = %config.db_path.display(),
        source = %config.source_collection,
        reference = %config.reference_collection,
        dry_run = config.dry_run,
        "starting backfill"
    );

    let storage = if config.dry_run {
        Storage::open_readonly(&config.db_path).await?
    } else {
        Storage::open(&config.db_path).await?
    };

    let reporter = CliProgress::new();
    let outcome = run_backfill(&storage, &config, &reporter).await;
    reporter.spinner.finish_and_clear();
    storage.close();
    let result = outcome?;

    println!();
    if result.dry_run {
        println!("  Dry run complete, nothing was written.");
    } else {
        println!("  Backfill completed successfully.");
    }
    println!("  Scanned:    {}", result.scanned);
    println!("  Qualifying: {}", result.qualifying);
    println!(
        "  Owners:     {} ({} resolved)",
        result.distinct_keys, result.resolved_keys
    );
    println!("  Planned:    {}", result.planned);
    println!("  Updated:    {}", result.updated);
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn update_queued(&self, record: &str, owner_key: &str, value: &str) {
        self.spinner
            .set_message(format!("Queued {record} ({owner_key} → {value})"));
    }

    fn done(&self, _result: &BackfillResult) {
        self.spinner.finish_and_clear();
    }
}

async fn cmd_import(
    config_path: Option<&Path>,
    collection: &str,
    file: &Path,
    db: Option<&str>,
) -> Result<()> {
    let app = resolve_config(config_path)?;
    let db_path = db.map_or_else(|| PathBuf::from(&app.store.path), PathBuf::from);

    let content = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| eyre!("'{}' is not valid JSON: {e}", file.display()))?;
    let docs = parse_documents(payload)?;

    let storage = Storage::open(&db_path).await?;
    let written = storage.import(collection, &docs).await?;
    storage.close();

    println!(
        "Imported {written} documents into '{collection}' ({})",
        db_path.display()
    );
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(p) => {
            backfill_shared::init_config_at(p)?;
            p.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
