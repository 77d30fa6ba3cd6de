//! TCP and TLS flow setup and framing.
//!
//! Grounded in `original_source/tcpclient.c`'s `readcb`: responses are
//! length-prefixed DNS messages, and a single read can contain zero,
//! one, or several complete messages, so the reader loops draining
//! complete frames until fewer than 4 bytes (length + query id) remain
//! buffered.

use crate::common::payload::TCP_PAYLOAD_LEN;
use crate::common::{Error, Mono, Result, Wall};
use crate::csv::{CsvRow, CsvSender};
use crate::flow::Flow;
use rustls_pki_types::ServerName;
use std::rc::Rc;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Accepts any certificate chain; used only for lab targets under
/// `--tls-insecure` (never the default).
#[derive(Debug)]
struct NoVerify;

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn build_tls_config(insecure: bool) -> Result<Arc<rustls::ClientConfig>> {
    if insecure {
        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify))
            .with_no_client_auth();
        return Ok(Arc::new(config));
    }
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Connect one plain-TCP flow to `addr`, disabling Nagle's algorithm
/// (the original relies on libevent's bufferevent doing the same), and
/// spawn its writer and reader tasks.
pub async fn connect_tcp(
    connection_id: u32,
    addr: std::net::SocketAddr,
    ring_capacity: usize,
    csv: Option<CsvSender>,
) -> Result<(Rc<Flow>, JoinHandle<()>, JoinHandle<()>)> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::connection(format!("connection {connection_id}: {e}")))?;
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel::<Box<[u8]>>();
    let writer_handle = tokio::task::spawn_local(writer_loop(connection_id, write_half, rx));

    let flow = Rc::new(Flow::new(connection_id, ring_capacity, tx));
    let reader_handle = tokio::task::spawn_local(length_prefixed_reader_loop(
        connection_id,
        read_half,
        flow.clone(),
        csv,
    ));
    Ok((flow, writer_handle, reader_handle))
}

/// Connect one TLS flow over TCP, performing the handshake before the
/// flow is handed back to the caller (so the first query is never
/// written ahead of `ClientHello` completing).
pub async fn connect_tls(
    connection_id: u32,
    addr: std::net::SocketAddr,
    server_name: String,
    insecure: bool,
    ring_capacity: usize,
    csv: Option<CsvSender>,
) -> Result<(Rc<Flow>, JoinHandle<()>, JoinHandle<()>)> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::connection(format!("connection {connection_id}: {e}")))?;
    stream.set_nodelay(true).ok();

    let config = build_tls_config(insecure)?;
    let connector = tokio_rustls::TlsConnector::from(config);
    let name = ServerName::try_from(server_name.clone())
        .map_err(|_| Error::tls(format!("invalid TLS server name: {server_name}")))?;
    let tls_stream = connector
        .connect(name, stream)
        .await
        .map_err(|e| Error::tls(format!("connection {connection_id}: handshake failed: {e}")))?;

    let (read_half, write_half) = tokio::io::split(tls_stream);
    let (tx, rx) = mpsc::unbounded_channel::<Box<[u8]>>();
    let writer_handle = tokio::task::spawn_local(writer_loop(connection_id, write_half, rx));

    let flow = Rc::new(Flow::new(connection_id, ring_capacity, tx));
    let reader_handle = tokio::task::spawn_local(length_prefixed_reader_loop(
        connection_id,
        read_half,
        flow.clone(),
        csv,
    ));
    Ok((flow, writer_handle, reader_handle))
}

async fn writer_loop<W>(connection_id: u32, mut write_half: W, mut rx: mpsc::UnboundedReceiver<Box<[u8]>>)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut logged = false;
    while let Some(buf) = rx.recv().await {
        if let Err(e) = write_half.write_all(&buf).await {
            if !logged {
                logged = true;
                tracing::warn!(connection_id, error = %e, "write failed, flow degraded");
            }
        }
    }
}

async fn length_prefixed_reader_loop<R>(
    connection_id: u32,
    mut read_half: R,
    flow: Rc<Flow>,
    csv: Option<CsvSender>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    debug_assert_eq!(TCP_PAYLOAD_LEN, 31, "kept in sync with the wire template");
    let mut buf = Vec::with_capacity(4096);
    let mut logged = false;
    loop {
        let mut chunk = [0u8; 4096];
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => {
                tracing::debug!(connection_id, "peer closed connection");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                if !logged {
                    logged = true;
                    tracing::warn!(connection_id, error = %e, "read failed, flow degraded");
                }
                return;
            }
        };
        buf.extend_from_slice(&chunk[..n]);

        // §4.4 step 3: clocks are sampled per framed message, not once
        // per `read()` — a single read can drain several queued
        // replies, and reusing one timestamp across all of them would
        // give the later ones an RTT that's slightly too low.
        let mut consumed = 0;
        loop {
            let remaining = &buf[consumed..];
            if remaining.len() < 4 {
                break;
            }
            let mono_now = Mono::now();
            let wall_now = csv.as_ref().map(|_| Wall::now());

            let dns_len = u16::from_be_bytes([remaining[0], remaining[1]]) as usize;
            let query_id = u16::from_be_bytes([remaining[2], remaining[3]]);
            if remaining.len() < dns_len + 2 {
                break;
            }
            let sent_at = flow.sent_at(query_id);
            let rtt_us = mono_now.micros_since(sent_at);
            if let (Some(csv), Some(wall)) = (&csv, wall_now) {
                let _ = csv.send(CsvRow::Answer {
                    wall,
                    connection_id: flow.connection_id,
                    query_id,
                    rtt_us,
                });
            }
            consumed += dns_len + 2;
        }
        buf.drain(..consumed);
    }
}
