//! pcapmib-agent - Traffic counters for capture points, served by index
//!
//! The agent:
//! - Reads monitor definitions from the config file
//! - Opens a raw packet capture per monitor
//! - Counts the traffic each monitor's filter accepts
//! - Serves the monitor table over gRPC
//! - Optionally writes periodic snapshots to a file

use anyhow::Result;

#[cfg(not(target_os = "linux"))]
fn main() -> Result<()> {
    eprintln!("Error: pcapmib-agent requires Linux to open packet sockets");
    std::process::exit(1);
}

#[cfg(target_os = "linux")]
mod pidfile {
    use anyhow::{Context, Result};
    use log::warn;
    use std::path::{Path, PathBuf};

    /// PID file removed again when dropped
    pub struct PidFile {
        path: PathBuf,
    }

    impl PidFile {
        pub fn create(path: &Path) -> Result<Self> {
            std::fs::write(path, format!("{}\n", std::process::id()))
                .with_context(|| format!("Failed to write PID file {}", path.display()))?;
            Ok(Self {
                path: path.to_path_buf(),
            })
        }
    }

    impl Drop for PidFile {
        fn drop(&mut self) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Failed to remove PID file {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(target_os = "linux")]
#[derive(clap::Parser, Debug)]
#[command(name = "pcapmib-agent")]
#[command(about = "Count captured traffic per monitor and serve it by index", long_about = None)]
#[command(version)]
struct Args {
    /// Monitor definitions file
    #[arg(
        short,
        long,
        env = "PCAPMIB_CONFIG",
        default_value = pcapmib_agent::config::DEFAULT_CONFIG_PATH
    )]
    config: std::path::PathBuf,

    /// Root OID of the monitor subtree
    #[arg(short, long, env = "PCAPMIB_BASE_OID", default_value = pcapmib_common::DEFAULT_BASE_OID)]
    base_oid: pcapmib_common::Oid,

    /// Query service address (host:port)
    #[arg(
        short,
        long,
        env = "PCAPMIB_LISTEN",
        default_value = pcapmib_agent::config::DEFAULT_LISTEN_ADDR
    )]
    listen: std::net::SocketAddr,

    /// Write table snapshots to this file
    #[arg(short, long, env = "PCAPMIB_EXPORT")]
    export: Option<std::path::PathBuf>,

    /// Snapshot format: json or prometheus
    #[arg(long, env = "PCAPMIB_EXPORT_FORMAT", default_value = "json")]
    export_format: pcapmib_agent::exporter::ExportFormat,

    /// Seconds between snapshots
    #[arg(long, env = "PCAPMIB_EXPORT_INTERVAL", default_value_t = 60)]
    export_interval: u64,

    /// Write the agent's PID to this file
    #[arg(short, long, env = "PCAPMIB_PIDFILE")]
    pidfile: Option<std::path::PathBuf>,

    /// More logging (-d debug, -dd trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,
}

#[cfg(target_os = "linux")]
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    use anyhow::Context;
    use clap::Parser;
    use log::{error, info};
    use pcapmib_agent::capture::packet_socket::PacketSocketBackend;
    use pcapmib_agent::config::{load_definitions, AgentConfig};
    use pcapmib_agent::exporter::Exporter;
    use pcapmib_agent::grpc_server::start_server;
    use pcapmib_agent::EventLoop;
    use std::time::Duration;
    use tokio::signal;
    use tokio_util::sync::CancellationToken;

    let args = Args::parse();

    let default_level = match args.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = AgentConfig {
        config_path: args.config,
        base_oid: args.base_oid,
        listen: args.listen,
        export_path: args.export,
        export_format: args.export_format,
        export_interval: Duration::from_secs(args.export_interval),
    };
    config.validate()?;

    info!("pcapmib-agent starting...");

    let _pidfile = args
        .pidfile
        .as_deref()
        .map(pidfile::PidFile::create)
        .transpose()?;

    let defs = match load_definitions(&config.config_path) {
        Ok(defs) => defs,
        Err(e) => {
            error!("{}", e);
            Vec::new()
        }
    };

    let mut event_loop = EventLoop::new(PacketSocketBackend, config.base_oid.clone());
    if let Some(path) = &config.export_path {
        event_loop = event_loop.with_exporter(
            Exporter::new(path, config.export_format),
            config.export_interval,
        );
    }
    event_loop.load(&defs);

    let shutdown = CancellationToken::new();

    start_server(
        event_loop.client(),
        config.base_oid.clone(),
        config.listen,
        shutdown.clone(),
    )
    .await
    .context("Failed to start gRPC server")?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                return;
            }
        };
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
            }
            _ = terminate.recv() => {}
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    info!("pcapmib-agent running. Press Ctrl+C to exit.");

    let result = event_loop.run(shutdown.clone()).await;
    shutdown.cancel();
    result?;

    info!("pcapmib-agent stopped");
    Ok(())
}
