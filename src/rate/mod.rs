//! Rate controller: turns `-r`, a step script, or a slope script into
//! Poisson-source spawns, retirements, and rate updates over time
//! (§4.5).
//!
//! The controller's states (`IDLE → ARMED → RUNNING → STOPPING →
//! EXIT`) are not reified as a literal enum — they fall directly out
//! of the shape of this one `async fn run`: the function hasn't been
//! called yet (`IDLE`), it is asleep in the start-up grace
//! (`ARMED`), it is executing a schedule (`RUNNING`), and it returns
//! (`STOPPING`/`EXIT`). Every transition is a scheduled timer; nothing
//! here blocks.

use crate::common::Result;
use crate::config::{
    EngineConfig, RateMode, ScriptMode, POISSON_PROCESS_PERIOD_MSEC, STARTUP_GRACE,
    UPDATE_INTERVAL_MS,
};
use crate::emitter::Emitter;
use crate::poisson::{sample_interarrival, PoissonPool, SourceCallback};
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Per-source rate used whenever sources are added/removed to track a
/// target aggregate rate rather than absorbing the change into λ
/// (slope mode, and the initial population of step/static modes).
fn nominal_lambda() -> f64 {
    1000.0 / POISSON_PROCESS_PERIOD_MSEC as f64
}

/// `N = round(rate · POISSON_PROCESS_PERIOD_MSEC / 1000)`, at least 1
/// so a positive rate always has somewhere to live.
fn source_count_for_rate(rate: f64) -> u32 {
    ((rate * POISSON_PROCESS_PERIOD_MSEC as f64 / 1000.0).round().max(1.0)) as u32
}

fn make_callback(emitter: Rc<Emitter>) -> SourceCallback {
    Rc::new(move |process_id, interval_us| emitter.emit(process_id, interval_us))
}

fn spawn_n(
    poisson: &PoissonPool,
    rng: &RefCell<StdRng>,
    n: u32,
    lambda: f64,
    callback: &SourceCallback,
) {
    for _ in 0..n {
        let initial_delay = sample_interarrival(rng, lambda);
        poisson.spawn(lambda, initial_delay, callback.clone());
    }
}

pub async fn run(
    config: &EngineConfig,
    poisson: Rc<PoissonPool>,
    rng: Rc<RefCell<StdRng>>,
    emitter: Rc<Emitter>,
) -> Result<()> {
    let callback = make_callback(emitter);

    tokio::time::sleep(STARTUP_GRACE).await;

    match &config.rate_mode {
        RateMode::Static(rate) => {
            let n = source_count_for_rate(*rate);
            let lambda = rate / n as f64;
            spawn_n(&poisson, &rng, n, lambda, &callback);
            match config.duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        }
        RateMode::Script { mode: ScriptMode::Rate, steps } => {
            let n = source_count_for_rate(steps.first().map(|s| s.value).unwrap_or(0.0));
            spawn_n(&poisson, &rng, n, nominal_lambda(), &callback);
            for step in steps {
                let lambda = step.value / n.max(1) as f64;
                poisson.set_rate_all(lambda);
                tokio::time::sleep(Duration::from_millis(step.duration_ms)).await;
            }
        }
        RateMode::Script { mode: ScriptMode::Slope, steps } => {
            run_slope_schedule(&poisson, &rng, &callback, steps).await;
        }
    }

    Ok(())
}

async fn run_slope_schedule(
    poisson: &PoissonPool,
    rng: &RefCell<StdRng>,
    callback: &SourceCallback,
    steps: &[crate::config::ScriptStep],
) {
    let lambda = nominal_lambda();
    for step in steps {
        let segment_duration = Duration::from_millis(step.duration_ms);
        if step.value == 0.0 {
            tokio::time::sleep(segment_duration).await;
            continue;
        }

        let delta_n_raw = (step.value * UPDATE_INTERVAL_MS as f64 / 1000.0).round() as i64;
        let delta_n = if delta_n_raw == 0 {
            step.value.signum() as i64
        } else {
            delta_n_raw
        };
        let period_us = ((1_000_000.0 * delta_n as f64) / step.value).abs().max(1.0) as u64;
        let mut ticker = tokio::time::interval(Duration::from_micros(period_us));
        ticker.tick().await; // interval's first tick fires immediately

        let segment_end = tokio::time::sleep(segment_duration);
        tokio::pin!(segment_end);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if delta_n > 0 {
                        spawn_n(poisson, rng, delta_n as u32, lambda, callback);
                    } else {
                        for _ in 0..delta_n.unsigned_abs() {
                            if poisson.retire_one().is_none() {
                                tracing::debug!("slope schedule tried to retire from an empty pool");
                                break;
                            }
                        }
                    }
                }
                _ = &mut segment_end => break,
            }
        }
    }
}
