//! coherence-serve: step a coherence engine in the background and serve
//! its snapshots over HTTP.
//!
//! ```text
//! coherence-serve --config run.json --bind 127.0.0.1:8080 --save-snapshot final.json
//! ```

mod server;
mod stepper;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use coherence3d::{CoherenceEngine, EngineConfig, SimulationBackend};

use crate::server::AppState;
use crate::stepper::{Shared, StepperSettings};

#[derive(Parser)]
#[command(name = "coherence-serve")]
#[command(about = "Run a nonlocal coherence simulation behind an HTTP API", long_about = None)]
struct Cli {
    /// Engine config as JSON; defaults are used for missing fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Milliseconds between stepping ticks
    #[arg(long, default_value_t = 20)]
    tick_ms: u64,

    /// Engine steps per tick
    #[arg(long, default_value_t = 10)]
    steps_per_tick: u64,

    /// Write the final snapshot here on shutdown
    #[arg(long)]
    save_snapshot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load_json(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let engine = CoherenceEngine::initialize(config.clone()).context("failed to initialize engine")?;

    let shared = Arc::new(Shared::new(engine.snapshot(), config));
    let (commands, receiver) = crossbeam_channel::unbounded();
    let shutdown = Arc::new(AtomicBool::new(false));
    let settings = StepperSettings {
        tick: Duration::from_millis(cli.tick_ms),
        steps_per_tick: cli.steps_per_tick.max(1),
    };
    let handle = stepper::spawn(engine, Arc::clone(&shared), receiver, Arc::clone(&shutdown), settings)
        .context("failed to start stepper thread")?;

    let app = server::router(Arc::new(AppState {
        shared,
        commands,
        reset_timeout: Duration::from_secs(30),
    }));

    log::info!("serving on http://{}", cli.bind);
    log::info!("  state:  GET  http://{}/state", cli.bind);
    log::info!("  reset:  POST http://{}/reset", cli.bind);
    log::info!("  info:   GET  http://{}/info", cli.bind);
    log::info!("  health: GET  http://{}/health", cli.bind);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.store(true, Ordering::Relaxed);
    let engine = tokio::task::spawn_blocking(move || handle.join())
        .await?
        .map_err(|_| anyhow!("stepper thread panicked"))?;

    if let Some(path) = &cli.save_snapshot {
        save_final_snapshot(&engine, path)?;
    }
    Ok(())
}

/// Write the backend's current snapshot as JSON.
fn save_final_snapshot<B: SimulationBackend>(backend: &B, path: &Path) -> Result<()> {
    backend
        .snapshot()
        .save_json(path)
        .with_context(|| format!("failed to save snapshot to {}", path.display()))?;
    log::info!("saved snapshot at step {} to {}", backend.steps(), path.display());
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("shutdown requested"),
        Err(err) => log::error!("failed to listen for ctrl-c: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coherence3d::EngineSnapshot;

    fn small_engine() -> CoherenceEngine {
        let config = EngineConfig {
            grid_size: 8,
            kernel_scale: 0.1,
            cutoff_radius: Some(0.25),
            diffusion_coefficient: 0.05,
            entropy_beta: 10.0,
            dt: 0.005,
            ..EngineConfig::default()
        };
        CoherenceEngine::initialize(config).unwrap()
    }

    #[test]
    fn test_final_snapshot_round_trips_through_disk() {
        let mut engine = small_engine();
        engine.run(6).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.json");
        save_final_snapshot(&engine, &path).unwrap();

        let loaded = EngineSnapshot::load_json(&path).unwrap();
        assert_eq!(loaded.step, 6);
        assert_eq!(loaded.density.source_resolution, 8);
        assert!((loaded.density.total_mass - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_final_snapshot_reports_unwritable_path() {
        let engine = small_engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("final.json");

        let err = save_final_snapshot(&engine, &path).unwrap_err();
        assert!(err.to_string().contains("failed to save snapshot"));
    }
}
