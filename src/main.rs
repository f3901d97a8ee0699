use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cloudcheck::config::{Config, APP_NAME};
use cloudcheck::gcp::{self, client::GcpSettings};
use cloudcheck::resource::{inventory::Inventory, Registry};
use cloudcheck::{Profile, Report, RunOptions, Runner};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Declarative checks against cloud resources
#[derive(Parser, Debug)]
#[command(name = "cloudcheck", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a profile and report the verdicts
    Exec(ExecArgs),
    /// List the registered resource types
    Types(BackendArgs),
}

#[derive(Args, Debug)]
struct BackendArgs {
    /// Inventory file (YAML or JSON) serving cached resource types
    #[arg(short, long)]
    inventory: Option<PathBuf>,

    /// GCP project for live resource types
    #[arg(short, long)]
    project: Option<String>,

    /// GCP zone, or "all"
    #[arg(short, long)]
    zone: Option<String>,
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// Profile file
    profile: PathBuf,

    #[command(flatten)]
    backend: BackendArgs,

    /// Assertions resolved at once within a control
    #[arg(long)]
    concurrency: Option<usize>,

    /// Deadline for the whole run, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: Format,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // RUST_LOG narrows output further when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudcheck started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = Config::config_dir() {
        return config_dir.join(format!("{}.log", APP_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(format!(".{}", APP_NAME)).join(format!("{}.log", APP_NAME));
    }
    PathBuf::from(format!("{}.log", APP_NAME))
}

/// Inventory types first, then GCP types when a project is known.
/// Two sources claiming the same type name is a start-up error.
fn build_registry(args: &BackendArgs, config: &Config) -> Result<Registry> {
    let mut builder = Registry::builder();

    if let Some(path) = args.inventory.as_ref().or(config.inventory.as_ref()) {
        let inventory = Inventory::load(path)?;
        inventory
            .register_into(&mut builder)
            .with_context(|| format!("Inventory {}", path.display()))?;
        tracing::info!("Loaded inventory {:?}", path);
    }

    let project = args.project.clone().or_else(|| config.effective_project());
    match project {
        Some(project) => {
            let zone = args.zone.clone().unwrap_or_else(|| config.effective_zone());
            tracing::info!("Using project: {}, zone: {}", project, zone);
            gcp::register_into(&mut builder, GcpSettings::new(project, zone))
                .context("GCP resource types")?;
        }
        None => tracing::info!("No GCP project configured, live GCP types disabled"),
    }

    Ok(builder.build())
}

fn run_options(args: &ExecArgs, config: &Config) -> RunOptions {
    let mut options = config.run_options();
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency.max(1);
    }
    if let Some(secs) = args.timeout {
        options.timeout = Some(Duration::from_secs(secs));
    }
    options
}

fn print_report(report: &Report, format: Format) -> Result<()> {
    match format {
        Format::Text => print!("{}", report.render_text()),
        Format::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

async fn exec(args: ExecArgs, config: Config) -> Result<u8> {
    let profile = Profile::load(&args.profile)?;
    let registry = Arc::new(build_registry(&args.backend, &config)?);
    let options = run_options(&args, &config);

    let report = Runner::new(registry).with_options(options).run(&profile).await;
    print_report(&report, args.format)?;
    tracing::info!("Run {} exit code {}", report.run_id, report.exit_code());

    Ok(report.exit_code())
}

fn list_types(args: &BackendArgs, config: &Config) -> Result<()> {
    let registry = build_registry(args, config)?;
    for name in registry.names() {
        println!("{:<30} {}", name, registry.display_name(name));
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<u8> {
    let config = Config::load();
    match cli.command {
        Command::Exec(args) => exec(args, config).await,
        Command::Types(args) => list_types(&args, &config).map(|_| 0),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match setup_logging(cli.log_level) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!("Start-up failure: {:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
