//! A minimal TCP + UDP reflector for exercising ratestorm against a
//! local target, grounded in `original_source/tcpserver.c`'s listener
//! setup. The original only logs accepted connections and never reads
//! from them, which is fine for a real DNS server target but leaves
//! nothing for RTT matching to bounce off of locally, so this demo
//! also mirrors every received message back byte-for-byte — enough to
//! exercise the length-prefixed TCP/TLS framing and the raw UDP
//! datagram path the client expects.

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};

#[derive(Parser, Debug)]
#[command(name = "echo-reflector")]
#[command(about = "Mirrors received TCP and UDP messages back to the sender")]
struct Args {
    /// Port to listen on for both TCP and UDP.
    #[arg(short = 'p', long = "port", default_value_t = 4242)]
    port: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let tcp = tokio::task::spawn_local(run_tcp(args.port));
            let udp = tokio::task::spawn_local(run_udp(args.port));
            let _ = tokio::join!(tcp, udp);
        })
        .await;
    Ok(())
}

async fn run_tcp(port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "tcp reflector listening");
    loop {
        let (mut stream, peer) = listener.accept().await?;
        tracing::debug!(%peer, "accepted tcp connection");
        tokio::task::spawn_local(async move {
            stream.set_nodelay(true).ok();
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }
}

async fn run_udp(port: u16) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "udp reflector listening");
    let mut buf = [0u8; 512];
    loop {
        let (n, peer) = socket.recv_from(&mut buf).await?;
        let _ = socket.send_to(&buf[..n], peer).await;
    }
}
