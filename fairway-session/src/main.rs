use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fairway_session::{
    SessionCoordinator,
    config::{Config, StorageConfig},
    storage::{RoundStore, memory::MemoryRoundStore, sqlite::SqliteRoundStore},
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "fairway")]
#[command(about = "Track golf balls and distances for a simulated round")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "fairway.toml")]
    config: PathBuf,

    /// Pair a ball under this name at startup (repeatable)
    #[arg(short, long = "pair", value_name = "NAME")]
    pair: Vec<String>,

    /// Start a round on the course with this name
    #[arg(long)]
    course: Option<String>,

    /// Seconds between distance reports
    #[arg(long, default_value_t = 5)]
    report_interval_secs: u64,

    /// Print reports as JSON lines instead of log events
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    match config.storage.clone() {
        StorageConfig::Memory => {
            info!("Using in-memory round store");
            run_session(MemoryRoundStore::new(), &config, &cli).await?;
        }
        StorageConfig::Sqlite { path } => {
            info!(path = ?path, "Using SQLite round store");
            let store = SqliteRoundStore::new(&path).await?;
            run_session(store, &config, &cli).await?;
        }
    }

    Ok(())
}

async fn run_session<S>(store: S, config: &Config, cli: &Cli) -> color_eyre::Result<()>
where
    S: RoundStore,
{
    let session = SessionCoordinator::from_config(store, config, None, None);
    session.start().await;

    if let Some(error) = session.last_error() {
        warn!(%error, "Session started with errors");
    }

    for name in &cli.pair {
        if !session.pair_ball(name).await {
            warn!(name = %name, "Pairing failed");
        }
    }

    if let Some(course_name) = &cli.course {
        start_round(&session, course_name).await;
    }

    let period = Duration::from_secs(cli.report_interval_secs.max(1));
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => report(&session, cli.json).await?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    if let Some(round) = session.active_round() {
        info!(
            round_id = %round.id,
            holes = round.scores.len(),
            strokes = round.total_strokes,
            to_par = round.score_to_par(),
            "Round still active"
        );
    }

    session.shutdown().await;
    Ok(())
}

async fn start_round<S: RoundStore>(session: &SessionCoordinator<S>, course_name: &str) {
    if let Some(round) = session.active_round() {
        info!(round_id = %round.id, course = %round.course_name, "Resuming active round");
        return;
    }

    let courses = session.courses();
    let Some(course) = courses
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(course_name))
    else {
        let available: Vec<&str> = courses.iter().map(|c| c.name.as_ref()).collect();
        warn!(course = course_name, ?available, "Unknown course");
        return;
    };

    if let Err(e) = session.start_round(course.id, &course.name).await {
        warn!(error = %e, "Could not start round");
    }
}

async fn report<S: RoundStore>(
    session: &SessionCoordinator<S>,
    json: bool,
) -> color_eyre::Result<()> {
    let measurements = session.measurements().await;

    if json {
        println!("{}", serde_json::to_string(&measurements)?);
        return Ok(());
    }

    if measurements.is_empty() {
        info!("Waiting for player location");
    }
    for m in &measurements {
        info!(
            label = %m.label,
            distance_m = m.distance_meters.round(),
            bearing_deg = m.bearing_degrees.round(),
            "Distance"
        );
    }

    Ok(())
}
