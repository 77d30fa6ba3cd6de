//! UDP flow setup and datagram matching.
//!
//! Grounded in `original_source/udpclient.c`'s `ev_callback`: UDP has
//! no framing to worry about, one read is one datagram, and `connect`
//! filters out replies from anyone but the intended peer so the kernel
//! does the address check for us.

use crate::common::payload::UDP_PAYLOAD_LEN;
use crate::common::{Error, Mono, Result, Wall};
use crate::csv::{CsvRow, CsvSender};
use crate::flow::Flow;
use std::rc::Rc;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bind and connect one UDP flow to `addr`, then spawn its writer and
/// reader tasks. Both tasks share the socket through an `Arc`, since
/// `UdpSocket`'s send/recv take `&self`.
pub async fn connect_udp(
    connection_id: u32,
    addr: std::net::SocketAddr,
    ring_capacity: usize,
    csv: Option<CsvSender>,
) -> Result<(Rc<Flow>, JoinHandle<()>, JoinHandle<()>)> {
    let local_addr = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(local_addr)
        .await
        .map_err(|e| Error::connection(format!("connection {connection_id}: bind failed: {e}")))?;
    socket
        .connect(addr)
        .await
        .map_err(|e| Error::connection(format!("connection {connection_id}: connect failed: {e}")))?;
    let socket = Arc::new(socket);

    let (tx, rx) = mpsc::unbounded_channel::<Box<[u8]>>();
    let writer_handle = tokio::task::spawn_local(writer_loop(connection_id, socket.clone(), rx));

    let flow = Rc::new(Flow::new(connection_id, ring_capacity, tx));
    let reader_handle = tokio::task::spawn_local(reader_loop(connection_id, socket, flow.clone(), csv));
    Ok((flow, writer_handle, reader_handle))
}

async fn writer_loop(connection_id: u32, socket: Arc<UdpSocket>, mut rx: mpsc::UnboundedReceiver<Box<[u8]>>) {
    let mut logged = false;
    while let Some(buf) = rx.recv().await {
        if let Err(e) = socket.send(&buf).await {
            if !logged {
                logged = true;
                tracing::warn!(connection_id, error = %e, "send failed, flow degraded");
            }
        }
    }
}

async fn reader_loop(connection_id: u32, socket: Arc<UdpSocket>, flow: Rc<Flow>, csv: Option<CsvSender>) {
    debug_assert_eq!(UDP_PAYLOAD_LEN, 29, "kept in sync with the wire template");
    // §4.4: "Read up to 256 bytes" — a reply is never larger than the
    // fixed payload, but we read a little past it rather than exactly
    // `UDP_PAYLOAD_LEN` so a reflector that echoes the query unmodified
    // is never truncated.
    let mut buf = [0u8; 256];
    let mut logged = false;
    loop {
        let n = match socket.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                if !logged {
                    logged = true;
                    tracing::warn!(connection_id, error = %e, "recv failed, flow degraded");
                }
                return;
            }
        };
        if n < 2 {
            continue;
        }
        let query_id = u16::from_be_bytes([buf[0], buf[1]]);
        let mono_now = Mono::now();
        let sent_at = flow.sent_at(query_id);
        let rtt_us = mono_now.micros_since(sent_at);
        if let Some(csv) = &csv {
            let _ = csv.send(CsvRow::Answer {
                wall: Wall::now(),
                connection_id: flow.connection_id,
                query_id,
                rtt_us,
            });
        }
    }
}
