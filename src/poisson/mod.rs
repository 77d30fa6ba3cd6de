//! Poisson pool: a superposition of independent exponential
//! inter-arrival generators sharing a rate knob (§4.2).
//!
//! Grounded in `original_source/poisson.c`: a dense, append-only arena
//! indexed by `process_id`, LIFO retirement from the tail so live
//! indices never move, and a self-rescheduling one-shot timer per
//! source. The Rust realization runs each source as a `spawn_local`
//! task on the engine's single-threaded `LocalSet`; the task *is* the
//! one-shot timer, and aborting its `JoinHandle` is the direct
//! analogue of `event_free()` on `poisson_process::event`.

use rand::rngs::StdRng;
use rand::Rng as _;
use rand::SeedableRng;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Invoked once per Poisson tick with `(process_id, next_interval_us)`.
/// `next_interval_us` is the interarrival just sampled to re-arm this
/// source's own timer (see `original_source/tcpclient.c`'s
/// `poisson_process_writecb`, which logs the newly generated interval
/// alongside the query it emits, not the one that just elapsed).
pub type SourceCallback = Rc<dyn Fn(u32, u64)>;

/// Sample `Δ = -ln(1 - U) / rate` with `U` uniform in `[0, 1)`.
///
/// Using `1 - U` rather than `U` keeps the singularity of `ln` at `U =
/// 1`, which `rand`'s `[0, 1)` sampling never produces, outside the
/// sample space (per the spec's explicit requirement).
///
/// A static `rate <= 0` is rejected as a fatal setup error before a
/// run ever starts (matching the original's `-r 0` usage check), but a
/// step schedule can legitimately drive a source's shared λ to zero
/// mid-run to hold a segment flat at no traffic. Rather than divide by
/// zero and feed `Duration::from_secs_f64` an infinite or `NaN` value
/// (which panics), a non-positive rate simply never fires again until
/// a later step raises λ back above zero.
pub fn sample_interarrival(rng: &RefCell<StdRng>, rate: f64) -> Duration {
    if rate <= 0.0 {
        return Duration::MAX;
    }
    let u: f64 = rng.borrow_mut().gen_range(0.0..1.0);
    let interarrival = -(1.0 - u).ln() / rate;
    Duration::from_secs_f64(interarrival.max(0.0))
}

struct Source {
    rate: Rc<Cell<f64>>,
    task: JoinHandle<()>,
}

/// A pool of independent Poisson sources sharing one RNG stream (safe
/// because the pool, like the rest of the engine, only ever runs on
/// one OS thread — see `src/lib.rs`).
pub struct PoissonPool {
    sources: RefCell<Vec<Source>>,
    rng: Rc<RefCell<StdRng>>,
}

impl PoissonPool {
    /// `rng` is shared with the rest of the engine (flow selection uses
    /// the same stream) so a single `--seed` determines every
    /// stochastic decision of the run, matching the original's single
    /// `drand48`/`lrand48` stream seeded once via `srand48`.
    pub fn new(rng: Rc<RefCell<StdRng>>) -> Self {
        PoissonPool {
            sources: RefCell::new(Vec::new()),
            rng,
        }
    }

    /// Number of live sources (`N` in the aggregate rate invariant).
    pub fn count(&self) -> usize {
        self.sources.borrow().len()
    }

    /// Spawn a new source at `rate`, armed to fire for the first time
    /// after `initial_delay` (the caller folds in the start-up grace).
    /// Returns the new source's `process_id`.
    pub fn spawn(&self, rate: f64, initial_delay: Duration, callback: SourceCallback) -> u32 {
        let mut sources = self.sources.borrow_mut();
        let process_id = sources.len() as u32;
        let rate_cell = Rc::new(Cell::new(rate));
        let task = {
            let rate_cell = rate_cell.clone();
            let rng = self.rng.clone();
            tokio::task::spawn_local(async move {
                let mut delay = initial_delay;
                loop {
                    tokio::time::sleep(delay).await;
                    let lambda = rate_cell.get();
                    let next = sample_interarrival(&rng, lambda);
                    delay = next;
                    callback(process_id, next.as_micros() as u64);
                }
            })
        };
        sources.push(Source { rate: rate_cell, task });
        process_id
    }

    /// Retire the most recently spawned live source (LIFO), cancelling
    /// its pending timer before it is dropped. Returns its
    /// `process_id`, or `None` if the pool is empty.
    pub fn retire_one(&self) -> Option<u32> {
        let mut sources = self.sources.borrow_mut();
        let process_id = sources.len().checked_sub(1)? as u32;
        let source = sources.pop()?;
        source.task.abort();
        Some(process_id)
    }

    /// Update the rate of a live source. No-op if `process_id` is out
    /// of range (e.g. already retired).
    pub fn set_rate(&self, process_id: u32, rate: f64) {
        if let Some(source) = self.sources.borrow().get(process_id as usize) {
            source.rate.set(rate);
        }
    }

    /// Set every live source's rate to the same value, as the step
    /// schedule does when it adjusts λ without changing `N`.
    pub fn set_rate_all(&self, rate: f64) {
        for source in self.sources.borrow().iter() {
            source.rate.set(rate);
        }
    }

    /// Cancel and drop every source. Used at shutdown.
    pub fn clear(&self) {
        for source in self.sources.borrow_mut().drain(..) {
            source.task.abort();
        }
    }
}

impl Drop for PoissonPool {
    fn drop(&mut self) {
        self.clear();
    }
}
