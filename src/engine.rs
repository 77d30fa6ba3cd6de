//! Engine: wires resolution, flow establishment, the Poisson pool, the
//! emitter and the rate controller together into one run (§2, §9).
//!
//! Grounded in `original_source/tcpclient.c`'s `main`: resolve, raise
//! the file descriptor limit, connect `C` flows, print the CSV header,
//! then start the Poisson processes and run until the schedule (or an
//! external signal) ends.

use crate::common::{Error, Result};
use crate::config::{EngineConfig, RateMode, Transport};
use crate::csv::CsvSender;
use crate::emitter::Emitter;
use crate::fdlimit;
use crate::flow::{ring_capacity, FlowPool};
use crate::poisson::PoissonPool;
use crate::resolver;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::rc::Rc;

pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Engine { config }
    }

    /// Run to completion on the current thread's `LocalSet`. Must be
    /// called from within a `LocalSet::run_until` (see `src/main.rs`);
    /// the engine's internal state is `!Send` by construction.
    pub async fn run(self) -> Result<()> {
        self.run_with_writer(tokio::io::stdout()).await
    }

    /// Like [`run`](Self::run), but CSV rows (when `--rtt` is set) are
    /// written to `writer` instead of stdout. Exists so tests can
    /// capture rows in memory instead of scraping process stdout.
    pub async fn run_with_writer<W>(self, writer: W) -> Result<()>
    where
        W: tokio::io::AsyncWrite + Unpin + 'static,
    {
        let config = self.config;
        if config.connections == 0 {
            return Err(Error::config("connections must be greater than zero"));
        }
        if let RateMode::Static(rate) = &config.rate_mode {
            if *rate <= 0.0 {
                return Err(Error::config("static rate must be greater than zero"));
            }
        }
        fdlimit::raise_and_check(config.connections);

        let addrs = match config.transport {
            Transport::Udp => resolver::resolve_udp(&config.host, config.port).await?,
            _ => resolver::resolve_and_probe(&config.host, config.port, true).await?,
        };
        tracing::info!(host = %config.host, port = config.port, resolved = addrs.len(), "resolved target");

        let csv: Option<CsvSender> = if config.rtt_csv {
            Some(crate::csv::spawn_sink(writer))
        } else {
            None
        };

        let max_rate = config.declared_max_rate();
        let ring_capacity = ring_capacity(config.max_rtt_msec, max_rate, config.connections);
        tracing::debug!(ring_capacity, max_rate, "sized per-flow response ring");

        tracing::info!(connections = config.connections, "opening flows");
        let flows = Rc::new(
            FlowPool::connect_all(
                &addrs,
                config.connections,
                config.new_conn_rate,
                config.transport,
                &config.tls,
                &config.host,
                ring_capacity,
                csv.clone(),
            )
            .await?,
        );
        tracing::info!("all flows established");

        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(config.seed)));
        let poisson = Rc::new(PoissonPool::new(rng.clone()));
        let emitter = Rc::new(Emitter::new(flows.clone(), rng.clone(), config.transport, csv));

        // A schedule ending normally and an operator hitting Ctrl+C
        // both end the run the same way: drop `flows`/`poisson`,
        // which aborts every per-flow and per-source task.
        tokio::select! {
            result = crate::rate::run(&config, poisson.clone(), rng, emitter) => result?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received shutdown signal, ending run");
            }
        }

        tracing::info!("run complete");
        Ok(())
    }
}
