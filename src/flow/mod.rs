//! Flow pool: the `C` long-lived connections queries are sent over
//! (§3, §4.3).
//!
//! Grounded in `original_source/tcpclient.c`'s `struct tcp_connection`
//! and `udpclient.c`'s `struct udp_connection`: each flow owns a
//! `connection_id`, a wrapping `next_query_id`, and a fixed-capacity
//! ring of timestamps indexed by `query_id % W`. The C version drives
//! both halves of a connection from one `bufferevent` callback pair;
//! here each flow gets two small cooperative tasks instead — a writer
//! that owns the write half and drains an unbounded channel, and a
//! reader that owns the read half and feeds the response matcher. No
//! lock ever guards a flow: the Poisson callback that wants to send a
//! query only ever does a non-blocking channel `send`, and the writer
//! task is the sole owner of its write half for the life of the flow.

pub mod tcp;
pub mod udp;

use crate::common::{Mono, Result};
use crate::config::{Transport, TlsOptions};
use crate::csv::CsvSender;
use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Per-flow ring of send timestamps, indexed by `query_id % capacity`.
/// Never held across an `.await` point, so a plain `RefCell` suffices
/// under the engine's single-threaded cooperative scheduler.
struct Ring {
    capacity: usize,
    timestamps: RefCell<Vec<Mono>>,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Ring {
            capacity,
            timestamps: RefCell::new(vec![Mono::now(); capacity]),
        }
    }

    fn record(&self, query_id: u16, ts: Mono) {
        let idx = (query_id as usize) % self.capacity;
        self.timestamps.borrow_mut()[idx] = ts;
    }

    /// RTT anchor for a returned `query_id`. If the slot was never
    /// stamped for this id (a stray or very stale reply), the result
    /// is meaningless but never panics or blocks — callers treat an
    /// implausible RTT as "not detected" rather than special-casing it.
    fn get(&self, query_id: u16) -> Mono {
        let idx = (query_id as usize) % self.capacity;
        self.timestamps.borrow()[idx]
    }
}

/// Ring capacity `W` per §4.3: sized so that at the declared maximum
/// aggregate rate, a single flow can hold ~8x its share of in-flight
/// queries before a query id wraps and collides with an unanswered
/// one.
pub fn ring_capacity(max_rtt_msec: u64, max_rate: f64, connections: u32) -> usize {
    let in_flight = 8.0 * max_rtt_msec as f64 * max_rate / connections.max(1) as f64 / 1000.0;
    if in_flight > 65_534.0 {
        65_535
    } else if in_flight < 20.0 {
        20
    } else {
        in_flight.ceil() as usize
    }
}

/// A single long-lived connection. Sending is fire-and-forget from the
/// caller's point of view: `send` stamps the timestamp and bumps
/// `next_query_id` synchronously, then hands the wire bytes to the
/// flow's writer task over an unbounded channel.
pub struct Flow {
    pub connection_id: u32,
    next_query_id: Cell<u16>,
    ring: Ring,
    write_tx: UnboundedSender<Box<[u8]>>,
    write_error_logged: Cell<bool>,
}

impl Flow {
    pub(crate) fn new(connection_id: u32, ring_capacity: usize, write_tx: UnboundedSender<Box<[u8]>>) -> Self {
        Flow {
            connection_id,
            next_query_id: Cell::new(0),
            ring: Ring::new(ring_capacity),
            write_tx,
            write_error_logged: Cell::new(false),
        }
    }

    /// Allocate the next query id, stamp its send timestamp, build the
    /// wire payload from it via `build`, and queue the result for
    /// transmission. Returns the query id actually used, for CSV
    /// logging. The query id must be known before the payload is built
    /// since it is stamped into the wire bytes.
    pub fn send(&self, build: impl FnOnce(u16) -> Box<[u8]>, now: Mono) -> u16 {
        let query_id = self.next_query_id.get();
        self.ring.record(query_id, now);
        self.next_query_id.set(query_id.wrapping_add(1));
        let payload = build(query_id);
        if self.write_tx.send(payload).is_err() && !self.write_error_logged.get() {
            self.write_error_logged.set(true);
            tracing::warn!(
                connection_id = self.connection_id,
                "flow writer task is gone, dropping query"
            );
        }
        query_id
    }

    /// RTT anchor recorded for `query_id` when it was sent.
    pub fn sent_at(&self, query_id: u16) -> Mono {
        self.ring.get(query_id)
    }
}

/// Select one of `flows` uniformly at random, mirroring
/// `lrand48() % nb_conn` in the original.
pub fn pick_uniform(flows: &[Rc<Flow>], rng: &RefCell<rand::rngs::StdRng>) -> Rc<Flow> {
    use rand::Rng as _;
    let idx = rng.borrow_mut().gen_range(0..flows.len());
    flows[idx].clone()
}

/// The `C` established flows a run sends queries over. Owns every
/// flow's writer and reader task: dropping the pool aborts them all,
/// which is what actually tears a run down at `EXIT` (without this,
/// the per-flow tasks are detached and would run until the process
/// itself exits).
pub struct FlowPool {
    flows: Vec<Rc<Flow>>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl FlowPool {
    /// Establish `connections` flows against `addrs` (round-robined,
    /// the way `getaddrinfo`'s result list is walked in the original,
    /// except we keep every flow instead of stopping at the first
    /// reachable address), pacing new connections to `new_conn_rate`
    /// per second so a large `-c` doesn't open thousands of sockets in
    /// the same instant (§4.3's "start-up connection pacing").
    pub async fn connect_all(
        addrs: &[SocketAddr],
        connections: u32,
        new_conn_rate: u32,
        transport: Transport,
        tls: &TlsOptions,
        host: &str,
        ring_capacity: usize,
        csv: Option<CsvSender>,
    ) -> Result<Self> {
        let interval = Duration::from_micros(1_000_000 / new_conn_rate.max(1) as u64);
        let mut flows = Vec::with_capacity(connections as usize);
        let mut handles = Vec::with_capacity(connections as usize * 2);
        for connection_id in 0..connections {
            if connection_id > 0 {
                tokio::time::sleep(interval).await;
            }
            let addr = addrs[connection_id as usize % addrs.len()];
            let (flow, writer_handle, reader_handle) = match transport {
                Transport::Tcp => {
                    tcp::connect_tcp(connection_id, addr, ring_capacity, csv.clone()).await?
                }
                Transport::Tls => {
                    let server_name = tls.server_name.clone().unwrap_or_else(|| host.to_string());
                    tcp::connect_tls(
                        connection_id,
                        addr,
                        server_name,
                        tls.insecure,
                        ring_capacity,
                        csv.clone(),
                    )
                    .await?
                }
                Transport::Udp => {
                    udp::connect_udp(connection_id, addr, ring_capacity, csv.clone()).await?
                }
            };
            flows.push(flow);
            handles.push(writer_handle);
            handles.push(reader_handle);
        }
        Ok(FlowPool { flows, handles })
    }

    pub fn flows(&self) -> &[Rc<Flow>] {
        &self.flows
    }

    pub fn pick_uniform(&self, rng: &RefCell<rand::rngs::StdRng>) -> Rc<Flow> {
        pick_uniform(&self.flows, rng)
    }
}

impl Drop for FlowPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_capacity_clamps_to_minimum() {
        assert_eq!(ring_capacity(60_000, 1.0, 1000), 20);
    }

    #[test]
    fn ring_capacity_clamps_to_maximum() {
        assert_eq!(ring_capacity(60_000, 1_000_000.0, 1), 65_535);
    }

    #[test]
    fn ring_capacity_scales_with_rate_over_connections() {
        let small = ring_capacity(1000, 100.0, 10);
        let large = ring_capacity(1000, 10_000.0, 10);
        assert!(large > small);
    }

    #[test]
    fn ring_records_and_recalls_by_query_id() {
        let ring = Ring::new(20);
        let t0 = Mono::now();
        ring.record(5, t0);
        // Same bucket after one full wrap.
        assert_eq!(ring.get(5).elapsed_us(), t0.elapsed_us());
        assert_eq!(ring.get(25).elapsed_us(), t0.elapsed_us());
    }

    #[test]
    fn ring_holds_w_minus_one_outstanding_queries_without_collision() {
        // §8 property 4: over any window of W consecutive queries on
        // one flow, all `query_id mod W` values are distinct. At W-1
        // outstanding (one short of a full wrap), every slot must
        // still hold its own distinct timestamp.
        let capacity = 20usize;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let flow = Flow::new(1, capacity, tx);
        let mut stamps = Vec::with_capacity(capacity - 1);
        for _ in 0..capacity - 1 {
            let now = Mono::now();
            let qid = flow.send(|_| Box::new([0u8; 4]), now);
            stamps.push((qid, now));
        }
        for (qid, now) in &stamps {
            assert_eq!(flow.sent_at(*qid).elapsed_us(), now.elapsed_us());
        }

        // The W-th query wraps the ring and overwrites slot 0, which
        // is the documented, statistically-unreachable-in-practice
        // overwrite policy rather than a detected error.
        let overwrite_now = Mono::now();
        let wrapped_qid = flow.send(|_| Box::new([0u8; 4]), overwrite_now);
        assert_eq!(wrapped_qid as usize % capacity, stamps[0].0 as usize % capacity);
        assert_eq!(flow.sent_at(stamps[0].0).elapsed_us(), overwrite_now.elapsed_us());
    }

    #[test]
    fn flow_send_allocates_sequential_query_ids() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let flow = Flow::new(1, 20, tx);
        let a = flow.send(|_| Box::new([0u8; 4]), Mono::now());
        let b = flow.send(|_| Box::new([0u8; 4]), Mono::now());
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn flow_send_wraps_query_id_at_u16_max() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let flow = Flow::new(1, 20, tx);
        flow.next_query_id.set(u16::MAX);
        let a = flow.send(|_| Box::new([0u8; 4]), Mono::now());
        let b = flow.send(|_| Box::new([0u8; 4]), Mono::now());
        assert_eq!(a, u16::MAX);
        assert_eq!(b, 0);
    }

    #[test]
    fn flow_send_passes_query_id_into_builder() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let flow = Flow::new(1, 20, tx);
        flow.next_query_id.set(7);
        let seen = Cell::new(None);
        flow.send(
            |qid| {
                seen.set(Some(qid));
                Box::new([0u8; 4])
            },
            Mono::now(),
        );
        assert_eq!(seen.get(), Some(7));
    }
}
