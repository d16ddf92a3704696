use std::fmt;
use std::sync::Arc;

use course_core::catalog::LessonCatalog;
use course_core::model::{LearnerId, LearnerRecord};
use services::{
    BotApiConfig, BotApiGateway, Clock, NotificationGateway, ProgressionEngine, RecordingGateway,
    SweepConfig, SweepScheduler,
};
use storage::repository::Storage;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidSweepSecs { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidSweepSecs { raw } => write!(f, "invalid --sweep-secs value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- run  [--db <sqlite_url>] [--catalog <path>] [--sweep-secs <n>]");
    eprintln!("  cargo run -p app -- seed [--db <sqlite_url>] [--catalog <path>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:course.sqlite3");
    eprintln!("  --catalog catalog.json");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  COURSE_DB_URL, COURSE_CATALOG, COURSE_BOT_TOKEN, COURSE_BOT_API_URL");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Seed,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "run" => Some(Self::Run),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    catalog_path: String,
    sweep_secs: Option<u64>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("COURSE_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://course.sqlite3".into(), normalize_sqlite_url);
        let mut catalog_path =
            std::env::var("COURSE_CATALOG").unwrap_or_else(|_| "catalog.json".into());
        let mut sweep_secs = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--catalog" => {
                    catalog_path = require_value(args, "--catalog")?;
                }
                "--sweep-secs" => {
                    let value = require_value(args, "--sweep-secs")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidSweepSecs { raw: value.clone() })?;
                    if parsed == 0 {
                        return Err(ArgsError::InvalidSweepSecs { raw: value });
                    }
                    sweep_secs = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            catalog_path,
            sweep_secs,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn load_catalog(path: &str) -> Result<Arc<LessonCatalog>, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let catalog = LessonCatalog::from_json_str(&raw)?;
    Ok(Arc::new(catalog))
}

fn build_gateway() -> Arc<dyn NotificationGateway> {
    match BotApiConfig::from_env() {
        Some(config) => match BotApiGateway::new(config) {
            Ok(gateway) => {
                info!("using bot API gateway");
                return Arc::new(gateway);
            }
            Err(err) => {
                warn!(error = %err, "could not build bot API gateway");
            }
        },
        None => {
            warn!("COURSE_BOT_TOKEN not set; deliveries are recorded in memory only");
        }
    }
    Arc::new(RecordingGateway::new())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None => Command::Run,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Run,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let mut iter = argv.into_iter();
    let parsed = Args::parse(&mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so
    // core/services stay pure.
    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;

    match cmd {
        Command::Run => {
            let catalog = load_catalog(&parsed.catalog_path)?;
            info!(
                lessons = catalog.len(),
                db = %parsed.db_url,
                "catalog loaded"
            );

            let clock = Clock::default_clock();
            let gateway = build_gateway();
            let engine = Arc::new(ProgressionEngine::new(
                clock,
                Arc::clone(&catalog),
                Arc::clone(&storage.learners),
                gateway,
                Arc::clone(&storage.mistakes),
            ));

            let mut config = SweepConfig::default();
            if let Some(secs) = parsed.sweep_secs {
                config.period = std::time::Duration::from_secs(secs);
            }
            let sweep = Arc::new(
                SweepScheduler::new(engine, Arc::clone(&storage.learners), clock)
                    .with_config(config),
            );

            let active = storage.learners.count_active().await?;
            info!(active_learners = active, "progression daemon started");

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let sweep_task = {
                let sweep = Arc::clone(&sweep);
                tokio::spawn(async move { sweep.run(shutdown_rx).await })
            };

            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            let _ = shutdown_tx.send(true);
            let _ = sweep_task.await;
            Ok(())
        }
        Command::Seed => {
            // Demo learners so a fresh database has something to sweep.
            let catalog = load_catalog(&parsed.catalog_path)?;
            let now = Clock::default_clock().now();
            let mut created = 0;
            for (id, name, role) in [
                (1001_u64, "Alice", "colorist"),
                (1002, "Boris", "retoucher"),
                (1003, "Clara", "printer"),
            ] {
                let record = LearnerRecord::new(LearnerId::new(id), name, role, now);
                match storage.learners.insert(&record).await {
                    Ok(()) => created += 1,
                    Err(storage::repository::StorageError::Conflict) => {
                        eprintln!("learner {id} already exists, skipping");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            println!(
                "seeded {created} learners against a catalog of {} lessons (db={})",
                catalog.len(),
                parsed.db_url
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
