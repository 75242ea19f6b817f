//! Background stepping thread.
//!
//! The stepper owns the backend. After every tick it publishes a fresh
//! `Arc<EngineSnapshot>`; readers clone the `Arc` and never block stepping
//! for longer than that clone. Resets arrive over a channel and are applied
//! between steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use coherence3d::{EngineSnapshot, EngineStatus, SimulationBackend};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;

/// Requests handled by the stepper between steps.
pub enum Command<C> {
    /// Rebuild from the given config, or from the current one when `None`.
    /// The outcome is sent back on `reply`.
    Reset {
        config: Option<C>,
        reply: Sender<Result<(), String>>,
    },
}

/// State shared between the stepper and the HTTP handlers.
pub struct Shared<C> {
    snapshot: RwLock<Arc<EngineSnapshot>>,
    config: RwLock<C>,
    started: Instant,
}

impl<C: Clone> Shared<C> {
    pub fn new(snapshot: EngineSnapshot, config: C) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            config: RwLock::new(config),
            started: Instant::now(),
        }
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Config of the run that produced the latest snapshot.
    pub fn config(&self) -> C {
        self.config.read().clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    fn publish(&self, snapshot: EngineSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    fn set_config(&self, config: C) {
        *self.config.write() = config;
    }
}

/// Pacing of the stepping loop.
#[derive(Clone, Copy, Debug)]
pub struct StepperSettings {
    /// Wait between ticks
    pub tick: Duration,
    /// Engine steps per tick
    pub steps_per_tick: u64,
}

/// Start stepping `backend` on its own thread.
///
/// The thread runs until `shutdown` is set and returns the backend so the
/// caller can take a final snapshot.
pub fn spawn<B>(
    mut backend: B,
    shared: Arc<Shared<B::Config>>,
    commands: Receiver<Command<B::Config>>,
    shutdown: Arc<AtomicBool>,
    settings: StepperSettings,
) -> std::io::Result<JoinHandle<B>>
where
    B: SimulationBackend + 'static,
{
    std::thread::Builder::new()
        .name("stepper".into())
        .spawn(move || {
            log::info!(
                "stepper started: {} steps every {:?}",
                settings.steps_per_tick,
                settings.tick
            );
            while !shutdown.load(Ordering::Relaxed) {
                advance(&mut backend, settings.steps_per_tick, &shutdown);
                shared.publish(backend.snapshot());

                // Waiting on the channel doubles as the tick sleep
                match commands.recv_timeout(settings.tick) {
                    Ok(command) => handle(&mut backend, &shared, command),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        log::info!("command channel closed, stopping stepper");
                        break;
                    }
                }
            }
            log::info!("stepper stopped at step {}", backend.steps());
            backend
        })
}

/// Take up to `steps` steps, checking the shutdown flag between them.
fn advance<B: SimulationBackend>(backend: &mut B, steps: u64, shutdown: &AtomicBool) {
    if !backend.status().is_running() {
        return;
    }
    for _ in 0..steps {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        if let Err(err) = backend.step() {
            log::error!("stepping halted: {}", err);
            return;
        }
    }
}

fn handle<B: SimulationBackend>(backend: &mut B, shared: &Shared<B::Config>, command: Command<B::Config>) {
    match command {
        Command::Reset { config, reply } => {
            let config = config.unwrap_or_else(|| backend.config().clone());
            let outcome = backend.reset(config).map_err(|err| err.to_string());
            match &outcome {
                Ok(()) => {
                    log::info!("engine reset");
                    shared.set_config(backend.config().clone());
                    shared.publish(backend.snapshot());
                }
                Err(err) => log::warn!("reset rejected: {}", err),
            }
            // The requester may have given up waiting
            let _ = reply.send(outcome);
        }
    }
}

/// Human-readable status for logs and the health endpoint.
pub fn describe(status: &EngineStatus) -> String {
    match status {
        EngineStatus::Running => "running".to_string(),
        EngineStatus::Diverged { step, reason } => format!("diverged at step {}: {}", step, reason),
    }
}
