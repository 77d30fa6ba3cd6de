//! ratestorm CLI entry point.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use ratestorm::config::{
    parse_script, EngineConfig, RateMode, ScriptMode as ConfigScriptMode, Transport, TlsOptions,
    DEFAULT_MAX_RTT_MSEC,
};
use ratestorm::Engine;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliTransport {
    Tcp,
    Tls,
    Udp,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliScriptMode {
    Rate,
    Slope,
}

/// Connects to a target with a pool of long-lived connections and
/// drives DNS-shaped queries across them at a Poisson-distributed
/// rate.
#[derive(Parser, Debug)]
#[command(name = "ratestorm")]
#[command(version)]
#[command(about = "Poisson-distributed DNS-shaped load generator")]
struct Args {
    /// Target host name or address.
    #[arg(short = 'H', long = "host")]
    host: String,

    /// Target port.
    #[arg(short = 'p', long = "port")]
    port: u16,

    /// Transport used for every connection.
    #[arg(short = 'T', long = "transport", value_enum, default_value = "tcp")]
    transport: CliTransport,

    /// Number of long-lived connections to maintain.
    #[arg(short = 'c', long = "connections")]
    connections: u32,

    /// Static target aggregate rate, in queries per second. Mutually
    /// exclusive with `--script`.
    #[arg(short = 'r', long = "rate")]
    rate: Option<f64>,

    /// Path to a rate or rate-slope script; reads stdin if `-`.
    #[arg(long = "script")]
    script: Option<String>,

    /// Which grammar `--script`'s value column uses.
    #[arg(long = "script-mode", value_enum, default_value = "rate")]
    script_mode: CliScriptMode,

    /// Stop after this many seconds (static rate mode only; script
    /// schedules end on their own).
    #[arg(short = 't', long = "duration")]
    duration: Option<u64>,

    /// New connections to open per second during start-up.
    #[arg(short = 'n', long = "new-conn-rate", default_value_t = 1000)]
    new_conn_rate: u32,

    /// Print RTT samples as CSV to stdout.
    #[arg(short = 'R', long = "rtt")]
    rtt: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Random seed determining every stochastic decision of the run.
    #[arg(short = 's', long = "seed", default_value_t = 42)]
    seed: u64,

    /// SNI / certificate name for TLS; defaults to `--host`.
    #[arg(long = "tls-server-name")]
    tls_server_name: Option<String>,

    /// Skip TLS certificate validation (lab targets only).
    #[arg(long = "tls-insecure")]
    tls_insecure: bool,
}

fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // Diagnostics go to stderr, never stdout: stdout is the RTT CSV
    // stream's data contract (§6), and a `warn!`/`error!` interleaved
    // into it would corrupt every row after it.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("ratestorm={level}").parse()?),
        )
        .init();

    info!("ratestorm starting");

    let rate_mode = build_rate_mode(&args)?;

    let transport = match args.transport {
        CliTransport::Tcp => Transport::Tcp,
        CliTransport::Tls => Transport::Tls,
        CliTransport::Udp => Transport::Udp,
    };

    let config = EngineConfig {
        host: args.host,
        port: args.port,
        transport,
        connections: args.connections,
        rate_mode,
        duration: args.duration.map(Duration::from_secs),
        new_conn_rate: args.new_conn_rate,
        rtt_csv: args.rtt,
        verbose: args.verbose,
        seed: args.seed,
        tls: TlsOptions {
            server_name: args.tls_server_name,
            insecure: args.tls_insecure,
        },
        max_rtt_msec: DEFAULT_MAX_RTT_MSEC,
    };

    let engine = Engine::new(config);
    if let Err(e) = engine.run().await {
        error!("run failed: {e}");
        std::process::exit(1);
    }

    Ok(())
}

fn build_rate_mode(args: &Args) -> anyhow::Result<RateMode> {
    match (&args.rate, &args.script) {
        (Some(_), Some(_)) => {
            anyhow::bail!("--rate and --script are mutually exclusive")
        }
        (Some(rate), None) => {
            if *rate <= 0.0 {
                anyhow::bail!("--rate must be greater than zero");
            }
            Ok(RateMode::Static(*rate))
        }
        (None, Some(path)) => {
            let contents = read_script(path)?;
            let mode = match args.script_mode {
                CliScriptMode::Rate => ConfigScriptMode::Rate,
                CliScriptMode::Slope => ConfigScriptMode::Slope,
            };
            let steps = parse_script(&contents, mode)?;
            Ok(RateMode::Script { mode, steps })
        }
        (None, None) => anyhow::bail!("one of --rate or --script is required"),
    }
}

fn read_script(path: &str) -> anyhow::Result<String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(PathBuf::from(path))?)
    }
}
