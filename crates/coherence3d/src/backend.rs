//! Stepping interface shared by simulation backends.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::snapshot::{EngineSnapshot, EngineStatus};

/// A steppable simulation that can be observed through snapshots.
///
/// [`crate::CoherenceEngine`] implements this for the grid and particle
/// modes. Drivers such as the HTTP server only talk to this trait.
pub trait SimulationBackend: Send {
    /// Configuration accepted by `reset`.
    type Config: Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Advance by one time step. Once the backend has diverged, every call
    /// returns the divergence error until `reset`.
    fn step(&mut self) -> Result<()>;

    /// Rebuild from `config`. On error the current state is kept.
    fn reset(&mut self, config: Self::Config) -> Result<()>;

    fn snapshot(&self) -> EngineSnapshot;

    fn config(&self) -> &Self::Config;

    fn status(&self) -> &EngineStatus;

    /// Simulation time reached so far.
    fn time(&self) -> f64;

    /// Steps taken since the last reset.
    fn steps(&self) -> u64;
}
