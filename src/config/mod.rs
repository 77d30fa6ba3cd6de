//! Engine configuration.
//!
//! `EngineConfig` is a plain struct populated by the `ratestorm` binary
//! from `clap`-parsed arguments (see `src/main.rs`); the engine itself
//! never touches `std::env::args` or a CLI parser, so it stays
//! embeddable and unit-testable.

pub mod script;

pub use script::{parse_script, ScriptMode, ScriptStep};

use std::time::Duration;

/// Default sending period of a single Poisson process, in milliseconds.
pub const POISSON_PROCESS_PERIOD_MSEC: u64 = 1000;

/// Default maximum expected response time, in milliseconds.
pub const DEFAULT_MAX_RTT_MSEC: u64 = 60_000;

/// Fixed start-up grace period before any query is sent or any rate
/// schedule begins, to avoid a synchronized burst at loop entry.
pub const STARTUP_GRACE: Duration = Duration::from_secs(5);

/// Period of the slope schedule's adjustment timer.
pub const UPDATE_INTERVAL_MS: u64 = 100;

/// Transport used for every flow in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Tls,
    Udp,
}

/// Either a fixed rate for the whole run, or a command script driving
/// the rate controller (§4.5).
#[derive(Debug, Clone)]
pub enum RateMode {
    /// `-r rate`: constant aggregate rate for the whole run.
    Static(f64),
    /// `--script`: a step or slope schedule.
    Script {
        mode: ScriptMode,
        steps: Vec<ScriptStep>,
    },
}

/// TLS-specific options, only consulted when `transport == Tls`.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// SNI / certificate validation name; defaults to the target host.
    pub server_name: Option<String>,
    /// Skip certificate validation entirely (lab targets only).
    pub insecure: bool,
}

/// Full engine configuration for one run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    /// Number of flows (`C` in the spec), must be > 0.
    pub connections: u32,
    pub rate_mode: RateMode,
    /// `None` means "run until the rate schedule's own end"; for a
    /// static rate, `None` means run forever (until interrupted).
    pub duration: Option<Duration>,
    pub new_conn_rate: u32,
    pub rtt_csv: bool,
    pub verbose: u8,
    pub seed: u64,
    pub tls: TlsOptions,
    pub max_rtt_msec: u64,
}

impl EngineConfig {
    /// The declared aggregate rate used to size the per-flow ring
    /// (§4.3): the static rate, or the largest rate ever named by a
    /// step/slope schedule (a conservative upper bound for slopes,
    /// since the exact peak depends on the integrated trajectory).
    pub fn declared_max_rate(&self) -> f64 {
        match &self.rate_mode {
            RateMode::Static(r) => *r,
            RateMode::Script { mode: ScriptMode::Rate, steps } => {
                steps.iter().map(|s| s.value).fold(0.0, f64::max)
            }
            RateMode::Script { mode: ScriptMode::Slope, steps } => {
                // Integrate slopes from rate 0 to find the largest
                // rate reached at any segment boundary; this can't
                // know the true start rate for the first segment, so
                // the caller is expected to pass the initial rate in
                // separately when one is known (see `RateController`).
                let mut rate = 0.0f64;
                let mut peak = 0.0f64;
                for step in steps {
                    let segment_seconds = step.duration_ms as f64 / 1000.0;
                    rate += step.value * segment_seconds;
                    peak = peak.max(rate);
                }
                peak.max(1.0)
            }
        }
    }
}
