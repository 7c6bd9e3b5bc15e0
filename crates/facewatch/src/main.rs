use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use facewatch_core::RegistryStore;
use facewatch_hw::Camera;
use engine::{EngineError, ExitReason};
use std::future::Future;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

mod config;
mod display;
mod engine;
mod speech;

use config::Config;

#[derive(Parser)]
#[command(name = "facewatch", about = "Live face identification with voice enrollment")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live identification loop
    Run,
    /// List enrolled identities
    List,
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::List => list(&config),
        Commands::Devices => {
            devices();
            Ok(())
        }
        Commands::Test => camera_test(&config),
    }
}

async fn run(config: Config) -> Result<()> {
    tracing::info!(
        device = %config.camera.device,
        output = %config.storage.output_dir.display(),
        "facewatch starting"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let done = engine::spawn(config, stop.clone())?;
    let quit = quit_key();

    println!("Running. Type q and press Enter (or Ctrl-C) to stop.");

    let interrupt = || async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for interrupts");
            std::future::pending::<()>().await;
        }
    };

    match supervise(done, quit, &stop, interrupt).await {
        Supervised::Finished(Ok(Ok(reason))) => {
            tracing::info!(?reason, "facewatch stopped");
            Ok(())
        }
        Supervised::Finished(Ok(Err(e))) => Err(e.into()),
        Supervised::Finished(Err(_)) => bail!("engine thread exited without reporting"),
        Supervised::Abandoned => bail!("interrupted again before the engine stopped"),
    }
}

type EngineOutcome = Result<Result<ExitReason, EngineError>, oneshot::error::RecvError>;

enum Supervised {
    Finished(EngineOutcome),
    /// A second interrupt arrived while waiting for the engine to stop.
    Abandoned,
}

/// Wait for the engine to finish. The first interrupt or the quit key raises
/// `stop`; a second interrupt gives up waiting.
async fn supervise<F, Fut>(
    mut done: oneshot::Receiver<Result<ExitReason, EngineError>>,
    mut quit: oneshot::Receiver<()>,
    stop: &AtomicBool,
    mut interrupt: F,
) -> Supervised
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    tokio::select! {
        result = &mut done => return Supervised::Finished(result),
        _ = interrupt() => tracing::info!("interrupt received, shutting down"),
        Ok(()) = &mut quit => tracing::info!("quit key pressed, shutting down"),
    }
    stop.store(true, Ordering::Relaxed);

    tokio::select! {
        result = &mut done => Supervised::Finished(result),
        _ = interrupt() => {
            tracing::warn!("second interrupt, not waiting for the engine");
            Supervised::Abandoned
        }
    }
}

/// Resolves when a line reading `q` arrives on stdin. Dropped unresolved on EOF.
fn quit_key() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("facewatch-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                        let _ = tx.send(());
                        return;
                    }
                    Ok(_) => continue,
                    Err(_) => return,
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "quit key unavailable");
    }
    rx
}

fn list(config: &Config) -> Result<()> {
    let store = RegistryStore::new(&config.storage.output_dir);
    let (records, _) = store.load()?;

    if records.is_empty() {
        println!("No identities enrolled ({})", store.registry_path().display());
        return Ok(());
    }

    println!("{:<4} {:<20} {:<6} {:<12} {:<5} PHOTO", "#", "NAME", "AGE", "MOOD", "DIM");
    for (i, record) in records.iter().enumerate() {
        println!(
            "{:<4} {:<20} {:<6} {:<12} {:<5} {}",
            i,
            record.name,
            record.age,
            record.mood,
            record.embedding.len(),
            record.photo_path.display()
        );
    }
    Ok(())
}

fn devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

fn camera_test(config: &Config) -> Result<()> {
    println!("Running camera diagnostics on {}...", config.camera.device);
    let mut camera = Camera::open(&config.camera.device, config.camera.width, config.camera.height)?;
    println!(
        "  format:     {:?} {}x{}",
        camera.pixel_format(),
        camera.width,
        camera.height
    );

    camera.discard_frames(config.camera.warmup_frames);
    let frame = camera.capture_frame()?;
    println!("  frame:      {}x{} (seq {})", frame.width(), frame.height(), frame.sequence);
    println!("  brightness: {:.1}", frame.avg_brightness());
    Ok(())
}
