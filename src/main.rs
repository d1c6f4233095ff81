use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skytrack::aviation_api::AviationApiClient;
use skytrack::config::{TrackerConfig, config_path};
use skytrack::database::{self, ConnectionSource, PgPool};
use skytrack::observations_repo::ObservationsRepository;
use skytrack::positions_repo::PositionsRepository;
use skytrack::retry::{Sleeper, TokioSleeper};
use skytrack::tracker::{CycleOutcome, Tracker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const VERSION: &str = match option_env!("VERGEN_GIT_DESCRIBE") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Parser)]
#[command(name = "skytrack")]
#[command(version = VERSION)]
#[command(about = "Poll a flight-data API and record aircraft positions in PostgreSQL")]
struct Cli {
    /// Path to the TOML config file (defaults to SKYTRACK_CONFIG or ./skytrack.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracker loop until interrupted
    Run {
        /// Serve Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Run a single fetch/filter/persist cycle and print its report
    Once,
    /// Apply pending database migrations and exit
    Migrate,
    /// Print recently recorded positions as JSON lines
    Recent {
        /// How far back to look
        #[arg(long, default_value_t = 60)]
        minutes: i32,
        /// Maximum number of rows
        #[arg(long, default_value_t = 1000)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let _sentry = std::env::var("SENTRY_DSN").ok().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: Some(VERSION.into()),
                environment: std::env::var("SKYTRACK_ENV").ok().map(Into::into),
                ..Default::default()
            },
        ))
    });

    skytrack::logging::init_tracing();

    let cli = Cli::parse();
    let path = config_path(cli.config.as_deref());
    let config = TrackerConfig::resolve(&path)
        .with_context(|| format!("Invalid configuration ({})", path.display()))?;
    info!("skytrack {} starting with config {}", VERSION, path.display());

    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    let pool = database::build_pool(&config.database);

    match cli.command {
        Commands::Run { metrics_port } => {
            let tracker = build_tracker(&config, pool.clone(), sleeper.clone())?;

            if let Some(port) = metrics_port {
                let handle = skytrack::metrics::init_metrics()?;
                skytrack::metrics::initialize_tracker_metrics();
                tokio::spawn(async move {
                    if let Err(e) = skytrack::metrics::start_metrics_server(port, handle).await {
                        error!("Metrics server exited: {:#}", e);
                    }
                });
            }

            migrate(&config, pool, sleeper.as_ref()).await?;

            let shutdown = CancellationToken::new();
            spawn_shutdown_handler(shutdown.clone());
            tracker.run(shutdown).await;
        }
        Commands::Once => {
            let tracker = build_tracker(&config, pool.clone(), sleeper.clone())?;
            migrate(&config, pool, sleeper.as_ref()).await?;

            let outcome = tracker.run_cycle_guarded().await;
            println!(
                "{}",
                serde_json::json!({
                    "outcome": outcome.label(),
                    "report": outcome.report(),
                })
            );
            if let CycleOutcome::Failed(reason) = outcome {
                anyhow::bail!("Cycle failed: {reason}");
            }
        }
        Commands::Migrate => {
            migrate(&config, pool, sleeper.as_ref()).await?;
        }
        Commands::Recent { minutes, limit } => {
            let positions = PositionsRepository::new(pool)
                .recent_positions(minutes, limit)
                .await?;
            for position in positions {
                println!("{}", serde_json::to_string(&position)?);
            }
        }
    }

    Ok(())
}

async fn migrate(config: &TrackerConfig, pool: PgPool, sleeper: &dyn Sleeper) -> Result<()> {
    let source: Arc<dyn ConnectionSource> = Arc::new(pool);
    database::run_migrations(&source, &config.database.retry, sleeper)
        .await
        .context("Database is not ready")?;
    Ok(())
}

/// Wire the tracker. Fails on a missing API key without touching the
/// database, so call it before migrating.
fn build_tracker(config: &TrackerConfig, pool: PgPool, sleeper: Arc<dyn Sleeper>) -> Result<Tracker> {
    let api_key = config.require_api_key()?;
    let client = AviationApiClient::new(&config.api, api_key, Arc::clone(&sleeper))?;
    let repository = ObservationsRepository::new(pool, config.database.retry, sleeper);

    Ok(Tracker::new(
        Arc::new(client),
        Arc::new(repository),
        config.bbox,
        config.schedule,
    ))
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM. The tracker notices between cycles.
fn spawn_shutdown_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Unable to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Unable to listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received Ctrl+C, stopping after the current cycle");
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping after the current cycle");
            }
        }
        shutdown.cancel();
    });
}
