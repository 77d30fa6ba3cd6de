//! Hostname resolution and reachability probing.
//!
//! Grounded in `original_source/tcpclient.c`'s `main`: it walks
//! `getaddrinfo`'s result list, connects, and keeps the first address
//! that succeeds (closing the probe socket immediately — the real
//! flows open their own connections later). We keep every resolved
//! address reachable at probe time instead of only the first, so
//! `FlowPool::connect_all` can round-robin across them.

use crate::common::{Error, Result};
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpStream, UdpSocket};

/// Resolve `host:port` and, for stream transports, probe-connect to
/// each candidate address to filter out ones that refuse immediately
/// (a dead IP family, a firewalled path). UDP has no handshake to
/// probe, so every resolved address is returned unconditionally.
pub async fn resolve_and_probe(host: &str, port: u16, probe_tcp: bool) -> Result<Vec<SocketAddr>> {
    let candidates: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| Error::resolve(format!("{host}:{port}: {e}")))?
        .collect();
    if candidates.is_empty() {
        return Err(Error::resolve(format!("{host}:{port}: no addresses found")));
    }
    if !probe_tcp {
        return Ok(candidates);
    }

    let mut reachable = Vec::with_capacity(candidates.len());
    for addr in candidates {
        match TcpStream::connect(addr).await {
            Ok(_) => reachable.push(addr),
            Err(e) => {
                tracing::debug!(%addr, error = %e, "probe connect failed, skipping address");
            }
        }
    }
    if reachable.is_empty() {
        return Err(Error::resolve(format!(
            "{host}:{port}: resolved but none reachable"
        )));
    }
    Ok(reachable)
}

/// UDP has no connection attempt to probe; this just validates that a
/// local socket can be bound and `connect`ed, the way
/// `original_source/udpclient.c` does before arming the event loop.
pub async fn resolve_udp(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let candidates: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| Error::resolve(format!("{host}:{port}: {e}")))?
        .collect();
    if candidates.is_empty() {
        return Err(Error::resolve(format!("{host}:{port}: no addresses found")));
    }
    let probe_addr = candidates[0];
    let local = if probe_addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    let probe = UdpSocket::bind(local)
        .await
        .map_err(|e| Error::connection(format!("probe bind failed: {e}")))?;
    probe
        .connect(probe_addr)
        .await
        .map_err(|e| Error::connection(format!("probe connect failed: {e}")))?;
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_localhost_succeeds_without_probe() {
        let addrs = resolve_and_probe("localhost", 1, false).await.unwrap();
        assert!(!addrs.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_host_is_an_error() {
        let result = resolve_and_probe("this-host-should-not-exist.invalid", 53, false).await;
        assert!(result.is_err());
    }
}
