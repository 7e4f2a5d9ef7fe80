use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use classroom_core::model::{TeacherId, Viewer};
use services::{AppServices, Clock, EngineConfig, HelpQueueRow, HelpQueueSnapshot};

/// Classroom engine tools.
///
/// Engine tuning comes from `CLASSROOM_HELP_POLL_SECS`,
/// `CLASSROOM_AUTOSAVE_DEBOUNCE_MS` and `CLASSROOM_HELP_MESSAGE_MAX`; log
/// filtering from `RUST_LOG`.
#[derive(Debug, Parser)]
#[command(name = "classroom", version)]
struct Cli {
    /// `SQLite` URL or file path; relative paths resolve against the current
    /// directory.
    #[arg(
        long,
        global = true,
        env = "CLASSROOM_DB_URL",
        default_value = "sqlite://classroom.sqlite3",
        value_parser = parse_db_url
    )]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a teacher's open help requests as JSON lines, refreshing on the
    /// poll interval until Ctrl-C.
    HelpQueue(HelpQueueArgs),
}

#[derive(Debug, Args)]
struct HelpQueueArgs {
    #[arg(long, env = "CLASSROOM_TEACHER_ID")]
    teacher_id: TeacherId,

    /// Print one snapshot and exit.
    #[arg(long)]
    once: bool,
}

fn parse_db_url(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("database URL must not be empty".into());
    }
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return Ok(raw.to_owned());
    }
    let path = Path::new(raw.strip_prefix("sqlite:").unwrap_or(raw));
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    Ok(format!("sqlite://{}", absolute.display()))
}

/// Path of the database file behind `db_url`, if it names one.
fn sqlite_file(db_url: &str) -> Option<&Path> {
    let path = db_url.strip_prefix("sqlite://")?;
    let path = path.split('?').next().unwrap_or(path);
    (!path.is_empty()).then(|| Path::new(path))
}

/// `SQLite` refuses to open a missing file without `mode=rwc`; create it and its
/// directory up front so a fresh checkout works.
fn prepare_sqlite_file(db_url: &str) -> std::io::Result<()> {
    let Some(path) = sqlite_file(db_url) else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("services=info,app=info"));
    // Logs go to stderr so stdout stays machine readable.
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("failed to initialize tracing: {err}");
    }
}

fn print_rows(rows: &[HelpQueueRow]) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(rows)?);
    Ok(())
}

fn report(snapshot: &HelpQueueSnapshot) -> Result<(), serde_json::Error> {
    if let Some(error) = &snapshot.last_error {
        tracing::warn!(%error, "showing last known help requests");
    }
    print_rows(&snapshot.rows())
}

async fn help_queue(
    services: &AppServices,
    config: EngineConfig,
    args: &HelpQueueArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let viewer = Viewer::Teacher(args.teacher_id);

    if args.once {
        let requests = services.help_queue().help_requests(&viewer).await?;
        let rows: Vec<HelpQueueRow> = requests.iter().map(HelpQueueRow::from).collect();
        print_rows(&rows)?;
        return Ok(());
    }

    tracing::info!(
        teacher_id = %args.teacher_id,
        interval = ?config.help_poll_interval,
        "watching help requests"
    );
    let mut watch = services.watch_help_queue(&viewer)?;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            snapshot = watch.changed() => match snapshot {
                Some(snapshot) => report(&snapshot)?,
                None => break,
            },
        }
    }
    watch.stop().await;
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    prepare_sqlite_file(&cli.db)?;
    let config = EngineConfig::from_env();
    let services = AppServices::new_sqlite(&cli.db, Clock::system(), config).await?;
    tracing::debug!(db = %cli.db, "storage ready");

    match &cli.command {
        Command::HelpQueue(args) => help_queue(&services, config, args).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
