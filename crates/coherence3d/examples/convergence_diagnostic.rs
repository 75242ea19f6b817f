//! Convergence diagnostic for a small continuum run.
//!
//! Prints the successive-state metric, the fitted decay rate, the dominant
//! eigenvalue and the peak spacing ratios every few steps. Pass a config
//! JSON path as the first argument to override the built-in settings.

use coherence3d::{CoherenceEngine, DiagnosticsConfig, EngineConfig};

fn main() -> coherence3d::Result<()> {
    env_logger::init();
    println!("=== COHERENCE CONVERGENCE DIAGNOSTIC ===\n");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_json(path)?,
        None => EngineConfig {
            grid_size: 16,
            kernel_scale: 0.08,
            cutoff_radius: Some(0.24),
            diffusion_coefficient: 0.02,
            entropy_beta: 25.0,
            dt: 1e-3,
            perturbation_amplitude: 0.2,
            diagnostics: DiagnosticsConfig {
                interval: 50,
                ..DiagnosticsConfig::default()
            },
            ..EngineConfig::default()
        },
    };
    let tolerance = config.diagnostics.convergence_tolerance;
    let interval = config.diagnostics.interval;

    println!(
        "Grid {}^3, kernel scale {}, beta {}, D {}, dt {}",
        config.grid_size, config.kernel_scale, config.entropy_beta, config.diffusion_coefficient, config.dt
    );

    let mut engine = CoherenceEngine::initialize(config)?;
    let max_steps = 5000;
    for step in 1..=max_steps {
        engine.step()?;

        if step % interval == 0 {
            let snap = engine.snapshot();
            let d = &snap.diagnostics;
            println!(
                "Step {:5}: t={:.3} metric={:.3e} rate={} lambda={} peaks={} ratios={:?}",
                step,
                snap.time,
                d.latest_metric.unwrap_or(f64::NAN),
                d.decay.map_or("-".to_string(), |f| format!("{:.3}", f.rate)),
                d.eigenvalue.map_or("-".to_string(), |l| format!("{:.5}", l)),
                d.peaks.len(),
                d.spacing_ratios
            );
        }

        if engine.monitor().has_converged(tolerance) {
            println!("\nConverged after {} steps (t = {:.3})", step, engine.time());
            break;
        }
    }

    let snap = engine.snapshot();
    println!(
        "\nFinal: mass={:.6} max={:.4} mean={:.4} status={:?}",
        snap.density.total_mass, snap.density.max, snap.density.mean, snap.status
    );
    if let Some(energy) = snap.diagnostics.free_energy {
        println!(
            "Free energy: total={:.6} coherence={:.6} entropy={:.6}",
            energy.total, energy.coherence, energy.entropy
        );
    }
    Ok(())
}
