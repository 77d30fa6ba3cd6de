//! Query emission: turns one Poisson tick into one wire query on one
//! randomly chosen flow (§4.4).
//!
//! Grounded in `original_source/tcpclient.c`'s `poisson_process_writecb`:
//! record the send timestamp, pick a flow uniformly, stamp and send
//! the query, and log the `Q` row with the *next* interarrival that
//! was just sampled to re-arm the Poisson source — not the one that
//! just elapsed.

use crate::common::payload::{tcp_query, udp_query};
use crate::common::{Mono, Wall};
use crate::config::Transport;
use crate::csv::{CsvRow, CsvSender};
use crate::flow::FlowPool;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;

/// Bound to one run; invoked once per Poisson tick via
/// `PoissonPool::spawn`'s callback.
pub struct Emitter {
    flows: Rc<FlowPool>,
    rng: Rc<RefCell<StdRng>>,
    transport: Transport,
    csv: Option<CsvSender>,
}

impl Emitter {
    pub fn new(
        flows: Rc<FlowPool>,
        rng: Rc<RefCell<StdRng>>,
        transport: Transport,
        csv: Option<CsvSender>,
    ) -> Self {
        Emitter { flows, rng, transport, csv }
    }

    /// Emit one query for Poisson process `poisson_id`, whose next
    /// interarrival (`poisson_interval_us`) was just sampled to
    /// re-arm its own timer.
    pub fn emit(&self, poisson_id: u32, poisson_interval_us: u64) {
        let flow = self.flows.pick_uniform(&self.rng);
        let transport = self.transport;
        let now = Mono::now();
        let query_id = flow.send(
            move |qid| match transport {
                Transport::Tcp | Transport::Tls => Box::new(tcp_query(qid)) as Box<[u8]>,
                Transport::Udp => Box::new(udp_query(qid)) as Box<[u8]>,
            },
            now,
        );
        if let Some(csv) = &self.csv {
            let _ = csv.send(CsvRow::Query {
                wall: Wall::now(),
                connection_id: flow.connection_id,
                query_id,
                poisson_id,
                poisson_interval_us,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;

    #[tokio::test(flavor = "current_thread")]
    async fn emit_allocates_increasing_query_ids_per_flow() {
        let local = LocalSet::new();
        local
            .run_until(async {
                // A single connected loopback flow would require a real
                // listener; here we only exercise the query-id/CSV
                // bookkeeping path via a flow built directly, mirroring
                // what `Flow::send` tests already cover in `flow::tests`.
                let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
                let flow = Rc::new(crate::flow::Flow::new(1, 20, tx));
                let built = flow.send(|qid| Box::new(tcp_query(qid)) as Box<[u8]>, Mono::now());
                assert_eq!(built, 0);
                assert!(rx.recv().await.is_some());
            })
            .await;
    }
}
