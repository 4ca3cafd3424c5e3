// src/main.rs
//! Walk Tracker - record walks from a GPS receiver and browse the archive

use anyhow::{bail, Context};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use walk_tracker::{
    config::TrackerConfig,
    display::{format_distance, TerminalDisplay},
    export::{self, RouteFormat},
    gps::{stream::list_serial_ports, StreamKind, StreamSource},
    JsonFileStore, SessionEvent, SourceError, SystemClock, Walk, WalkError, WalkSession,
};

type Session = WalkSession<StreamSource, JsonFileStore>;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SourceType {
    Gpsd,
    Serial,
    Replay,
}

/// Command line configuration; source options override the config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Position source to use
    #[arg(long, value_enum)]
    source: Option<SourceType>,

    /// Serial device for NMEA receivers
    #[arg(long)]
    serial_port: Option<String>,

    /// Serial baud rate; defaults to the configured rate, then 9600
    #[arg(long)]
    baudrate: Option<u32>,

    /// gpsd host
    #[arg(long)]
    gpsd_host: Option<String>,

    /// gpsd port
    #[arg(long)]
    gpsd_port: Option<u16>,

    /// NMEA log to replay as if it were a live receiver
    #[arg(long)]
    replay_file: Option<PathBuf>,

    /// Delay between replayed fixes in milliseconds
    #[arg(long, default_value_t = 1000)]
    replay_interval_ms: u64,

    /// Config file; defaults to ~/.config/walk-tracker/config.json
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding recorded walks
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Persist the source options given on this command line
    #[arg(long)]
    save_config: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a walk until Ctrl+C
    Record {
        /// Continue an interrupted walk instead of archiving it
        #[arg(long, conflicts_with = "discard")]
        resume: bool,
        /// Throw away an interrupted walk instead of archiving it
        #[arg(long)]
        discard: bool,
    },
    /// List finished walks, most recent first
    List,
    /// Show one walk
    Show { id: String },
    /// Delete one walk
    Delete { id: String },
    /// Totals over all finished walks
    Stats,
    /// Print the current position as a map region
    Locate,
    /// Write a walk's route to a file
    Export {
        id: String,
        #[arg(long, value_enum, default_value = "gpx")]
        format: RouteFormat,
        /// Defaults to walk-<id>.<extension>
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List serial ports that may carry a receiver
    Ports,
}

#[tokio::main]
async fn main() {
    if let Err(e) = real_main().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn real_main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_line_number(true)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!("Configuration: {config:?}");

    if let Command::Ports = cli.command {
        for port in list_serial_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let source = StreamSource::new(config.stream_kind()?, config.subscription_options());
    let store = JsonFileStore::new(config.data_dir()?)?;
    let session = WalkSession::open(source, store, Arc::new(SystemClock))
        .await
        .with_fix_timeout(config.fix_timeout());
    info!(
        "Using {}, walks in {}",
        session.source().kind(),
        session.store().dir().display()
    );

    match cli.command {
        Command::Record { resume, discard } => record(&session, resume, discard).await,
        Command::List => {
            list(&session);
            Ok(())
        }
        Command::Show { id } => {
            print_walk(&find_walk(&session, &id)?);
            Ok(())
        }
        Command::Delete { id } => {
            find_walk(&session, &id)?;
            session.delete_walk(&id).await?;
            println!("Deleted walk {}", id);
            Ok(())
        }
        Command::Stats => {
            print_stats(&session);
            Ok(())
        }
        Command::Locate => {
            let region = session.locate().await?;
            println!(
                "Latitude {:.6}, longitude {:.6} (span {}° x {}°)",
                region.latitude, region.longitude, region.latitude_delta, region.longitude_delta
            );
            Ok(())
        }
        Command::Export { id, format, output } => {
            let walk = find_walk(&session, &id)?;
            let path = output
                .unwrap_or_else(|| PathBuf::from(format!("walk-{}.{}", walk.id, format.extension())));
            export::export_to_file(&walk, &path, format)
                .with_context(|| format!("Failed to export to {}", path.display()))?;
            println!("Exported {} to {}", format.display_name(), path.display());
            Ok(())
        }
        Command::Ports => Ok(()),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<TrackerConfig> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => TrackerConfig::get_config_path()?,
    };
    let mut config = TrackerConfig::load_from(&config_path).unwrap_or_else(|e| {
        warn!("Using default configuration: {}", e);
        TrackerConfig::default()
    });

    match cli.source {
        Some(SourceType::Gpsd) => {
            let host = cli
                .gpsd_host
                .clone()
                .or_else(|| config.gpsd_host.clone())
                .unwrap_or_else(|| "localhost".to_string());
            let port = cli.gpsd_port.or(config.gpsd_port).unwrap_or(2947);
            config.update_gpsd(host, port);
        }
        Some(SourceType::Serial) => {
            let port = cli
                .serial_port
                .clone()
                .or_else(|| config.serial_port.clone())
                .context("--serial-port is required for the serial source")?;
            config.update_serial(port, cli.baudrate);
        }
        Some(SourceType::Replay) => {
            let file = cli
                .replay_file
                .clone()
                .or_else(|| config.replay_file.clone())
                .context("--replay-file is required for the replay source")?;
            config.update_replay(file, cli.replay_interval_ms);
        }
        None => {}
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }

    if cli.save_config {
        config.save_to(&config_path)?;
        info!("Saved configuration to {}", config_path.display());
    }
    Ok(config)
}

async fn record(session: &Session, resume: bool, discard: bool) -> anyhow::Result<()> {
    if let Some(pending) = session.recoverable() {
        if resume {
            session.resume_recovered().await?;
            println!("Resuming walk {} ({} points)", pending.id, pending.route.len());
        } else if discard {
            session.discard_recovered().await?;
            println!("Discarded interrupted walk {}", pending.id);
        } else if let Some(walk) = session.finalize_recovered().await? {
            println!("Archived interrupted walk from {}", local_time(&walk));
        }
    }

    if !session.is_recording() {
        let walk = session.start().await?;
        info!("Started walk {}", walk.id);
    }

    let running = Arc::new(AtomicBool::new(true));

    let flag = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flag.store(false, Ordering::Relaxed);
        }
    });

    let mut events = session.events();
    let flag = Arc::clone(&running);
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Interrupted { walk, error, saved }) => {
                    flag.store(false, Ordering::Relaxed);
                    return Some((walk, error, saved));
                }
                Ok(SessionEvent::PersistFailed { id, reason }) => {
                    warn!("Walk {} is not being saved: {}", id, reason);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} session events", skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    });

    TerminalDisplay::new()
        .run(|| session.status(), Arc::clone(&running))
        .await?;

    match session.stop().await {
        Ok(Some(walk)) => {
            watcher.abort();
            println!("\nWalk finished");
            print_walk(&walk);
            Ok(())
        }
        Ok(None) => {
            // The subscription failed and the session already wrapped up
            match tokio::time::timeout(Duration::from_secs(1), watcher).await {
                Ok(Ok(Some((walk, error, saved)))) => {
                    println!("\nTracking stopped: {}", error);
                    print_walk(&walk);
                    if !saved {
                        bail!("Walk {} could not be saved", walk.id);
                    }
                    let replay_finished = error == SourceError::Closed
                        && matches!(session.source().kind(), StreamKind::Replay { .. });
                    if replay_finished {
                        Ok(())
                    } else {
                        Err(WalkError::from(error).into())
                    }
                }
                _ => Ok(()),
            }
        }
        Err(WalkError::Unpersisted { walk, reason }) => {
            watcher.abort();
            print_walk(&walk);
            bail!("Walk {} could not be saved: {}", walk.id, reason)
        }
        Err(e) => {
            watcher.abort();
            Err(e.into())
        }
    }
}

fn find_walk(session: &Session, id: &str) -> anyhow::Result<Walk> {
    session
        .walk(id)
        .ok_or_else(|| WalkError::WalkNotFound(id.to_string()).into())
}

fn list(session: &Session) {
    let walks = session.archive();
    if walks.is_empty() {
        println!("No walks recorded yet");
        return;
    }

    println!("{:<15} {:<17} {:>10} {:>10}", "ID", "STARTED", "DISTANCE", "TIME");
    for walk in &walks {
        println!(
            "{:<15} {:<17} {:>7.2} km {:>10}",
            walk.id,
            local_time(walk),
            walk.distance_km(),
            walk.formatted_duration()
        );
    }
}

fn print_walk(walk: &Walk) {
    println!("  Walk:      {}", walk.id);
    println!("  Started:   {}", local_time(walk));
    println!("  Duration:  {}", walk.formatted_duration());
    println!("  Distance:  {}", format_distance(walk.distance_meters));
    println!("  Points:    {}", walk.route.len());
}

fn print_stats(session: &Session) {
    let stats = session.stats();
    println!("  Walks:          {}", stats.total_walks);
    println!("  Total distance: {}", format_distance(stats.total_distance_m));
    println!(
        "  Total time:     {}",
        walk_tracker::walk::format_duration(stats.total_seconds)
    );
    println!("  Avg distance:   {}", format_distance(stats.average_distance_m));
    println!(
        "  Avg time:       {}",
        walk_tracker::walk::format_duration(stats.average_seconds.round() as u64)
    );
}

fn local_time(walk: &Walk) -> String {
    walk.start_time
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}
