use anyhow::{Context, Result};
use bookarr::acquisition::{AcquisitionEngine, EngineComponents, NewRequest};
use bookarr::background_jobs::{create_scheduler, HookEvent, JobContext};
use bookarr::background_jobs::jobs::{DownloadMonitorJob, HealthCheckJob, QueueSweepJob};
use bookarr::config::{self, SettingsHandle};
use bookarr::health::HealthAggregator;
use bookarr::library::{build_viewer, default_viewer_factory, LibraryViewer};
use bookarr::search::build_providers;
use bookarr::store::{BookType, RequestStatus, SqliteAcquisitionStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

fn parse_book_type(s: &str) -> Result<BookType, String> {
    BookType::from_str(s).ok_or_else(|| format!("Unknown book type '{}' (audiobook, ebook)", s))
}

fn parse_status(s: &str) -> Result<RequestStatus, String> {
    RequestStatus::from_str(s).ok_or_else(|| format!("Unknown request status '{}'", s))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding acquisition.db. Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the background jobs until interrupted. The default.
    Run,

    /// Probe every configured service once and print the result.
    CheckHealth,

    /// List the libraries known to the library viewer.
    Libraries,

    /// Queue a new acquisition request.
    Request {
        title: String,
        #[clap(long)]
        author: Option<String>,
        #[clap(long = "type", value_parser = parse_book_type, default_value = "ebook")]
        book_type: BookType,
        #[clap(long, default_value = "operator")]
        requester: String,
        /// Work identifier at the metadata provider.
        #[clap(long)]
        work_id: Option<String>,
        #[clap(long)]
        edition_id: Option<String>,
        #[clap(long)]
        work_source: Option<String>,
        #[clap(long)]
        year: Option<i32>,
        /// Language to search in, overriding the configured default.
        #[clap(long)]
        language: Option<String>,
    },

    /// Cancel a request that has not reached processing.
    Cancel { request_id: String },

    /// Requeue a request that failed, found nothing or needs attention.
    Retry { request_id: String },

    /// Accept a stored candidate for a request by hand.
    Select {
        request_id: String,
        candidate_id: String,
    },

    /// List requests, optionally filtered by status.
    List {
        #[clap(long, value_parser = parse_status)]
        status: Option<RequestStatus>,
    },

    /// Show the stored candidates of a request, best first.
    Candidates { request_id: String },
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            config_path: args.config.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening acquisition database at {:?}", app_config.acquisition_db_path());
    let store = Arc::new(SqliteAcquisitionStore::new(app_config.acquisition_db_path())?);
    let settings = SettingsHandle::new(app_config.settings.clone())?;
    let engine = Arc::new(AcquisitionEngine::new(
        store.clone(),
        settings,
        EngineComponents::production(),
    )?);
    engine.sync_clients(&engine.settings().snapshot())?;

    match cli_args.command.unwrap_or(Command::Run) {
        Command::Run => run(app_config, engine).await,
        Command::CheckHealth => {
            let health = health_aggregator(&engine);
            let report = health.run(&engine.settings().snapshot()).await?;
            for service in &report.services {
                println!(
                    "{:<24} {:<10} {}",
                    service.service,
                    service.status.as_str(),
                    service.message.as_deref().unwrap_or("")
                );
            }
            if report.escalated > 0 {
                println!("{} request(s) flagged for attention", report.escalated);
            }
            Ok(())
        }
        Command::Libraries => {
            let settings = engine.settings().snapshot();
            let Some(viewer) = build_viewer(&settings.library)? else {
                println!("No library viewer configured");
                return Ok(());
            };
            for library in viewer.list_libraries().await? {
                let folders: Vec<&str> = library.folders.iter().map(|f| f.path.as_str()).collect();
                println!(
                    "{}  {} [{}] {}",
                    library.id,
                    library.name,
                    library.media_type.as_deref().unwrap_or("-"),
                    folders.join(", ")
                );
            }
            Ok(())
        }
        Command::Request {
            title,
            author,
            book_type,
            requester,
            work_id,
            edition_id,
            work_source,
            year,
            language,
        } => {
            let created = engine.create_request(NewRequest {
                requester_id: requester,
                title,
                author,
                book_type,
                work_source,
                work_id,
                edition_id,
                year,
                publisher: None,
                language: None,
                search_language: language,
            })?;
            println!("Request {} queued for book {}", created.request.id, created.book.id);
            if let Some(warning) = created.warning {
                println!("Warning: {}", warning);
            }
            Ok(())
        }
        Command::Cancel { request_id } => {
            let book_deleted = engine.cancel_request(&request_id)?;
            println!(
                "Request {} cancelled{}",
                request_id,
                if book_deleted { "; book removed" } else { "" }
            );
            Ok(())
        }
        Command::Retry { request_id } => {
            let request = engine.retry_request(&request_id).await?;
            println!("Request {} is now {}", request.id, request.status);
            Ok(())
        }
        Command::Select {
            request_id,
            candidate_id,
        } => {
            let (request, outcome) = engine.select_candidate(&request_id, &candidate_id).await?;
            println!("Request {} is now {} ({:?})", request.id, request.status, outcome);
            Ok(())
        }
        Command::List { status } => {
            for request in engine.list_requests(status)? {
                println!(
                    "{}  {:<12} retries={} {}",
                    request.id,
                    request.status.as_str(),
                    request.retry_count,
                    request.issue_description.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Command::Candidates { request_id } => {
            for candidate in engine.list_candidates(&request_id)? {
                println!(
                    "{}  {:>6.1} {:<8} {:<10} seeders={} {}",
                    candidate.id,
                    candidate.score,
                    candidate.download_type.as_str(),
                    candidate.status.as_str(),
                    candidate
                        .seeders
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    candidate.title
                );
            }
            Ok(())
        }
    }
}

fn health_aggregator(engine: &Arc<AcquisitionEngine>) -> HealthAggregator {
    HealthAggregator::new(
        engine.store().clone(),
        Arc::new(build_providers),
        engine.registry().clone(),
        default_viewer_factory(),
    )
}

async fn run(app_config: config::AppConfig, engine: Arc<AcquisitionEngine>) -> Result<()> {
    engine.recover()?;

    let shutdown_token = CancellationToken::new();
    let (hook_sender, hook_receiver) = mpsc::channel(100);
    let job_context = JobContext::new(
        shutdown_token.child_token(),
        engine.clone(),
        Arc::new(health_aggregator(&engine)),
    );

    let (mut scheduler, scheduler_handle) =
        create_scheduler(hook_receiver, shutdown_token.clone(), job_context);
    scheduler.register_job(Arc::new(QueueSweepJob)).await;
    scheduler.register_job(Arc::new(DownloadMonitorJob)).await;
    scheduler.register_job(Arc::new(HealthCheckJob)).await;
    info!(
        "Job scheduler initialized with {} job(s)",
        scheduler.job_count().await
    );
    for job in scheduler_handle.list_jobs().await {
        info!(
            "  {}: {} (every {}s, next run {})",
            job.id,
            job.description,
            job.schedule.value_secs.unwrap_or_default(),
            job.next_run_at.as_deref().unwrap_or("on hook")
        );
    }

    #[cfg(unix)]
    {
        if let Some(path) = app_config.config_path.clone() {
            spawn_reload_listener(path, engine.clone(), hook_sender.clone())?;
        }
    }
    #[cfg(not(unix))]
    let _ = (&app_config, &hook_sender);

    let ctrl_c_token = shutdown_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        ctrl_c_token.cancel();
    });

    scheduler.run().await;
    info!("Shutdown complete");
    Ok(())
}

/// Re-read the config file on SIGHUP and swap the settings when they
/// validate. The previous settings stay in force otherwise.
#[cfg(unix)]
fn spawn_reload_listener(
    path: PathBuf,
    engine: Arc<AcquisitionEngine>,
    hook_sender: mpsc::Sender<HookEvent>,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("Received SIGHUP, reloading {:?}", path);
            let reloaded = config::FileConfig::load(&path)
                .and_then(|file| Ok(config::Settings::from_file(&file)?))
                .and_then(|settings| engine.apply_settings(settings));
            match reloaded {
                Ok(()) => {
                    info!("Settings reloaded");
                    if let Err(e) = hook_sender.send(HookEvent::OnSettingsReload).await {
                        warn!("Failed to notify scheduler of reload: {}", e);
                    }
                }
                Err(e) => error!("Settings reload rejected, keeping current settings: {:#}", e),
            }
        }
    });
    Ok(())
}
