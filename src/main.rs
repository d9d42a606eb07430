use clap::Parser;
use remote_serialport_client::config::{Config, ConfigLoader};
use remote_serialport_client::port::VirtualPortStream;
use remote_serialport_client::{logging, RemoteSerialClient, Session};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal;
use tracing::{error, info, warn};

/// Bridge stdin/stdout to a serial device attached to a remote server.
///
/// Connects to the server, completes the handshake for the remote device,
/// registers the virtual ports and pipes the first one to the terminal.
#[derive(Parser, Debug)]
#[command(name = "remote-serial", version, about)]
struct Args {
    /// Configuration file (defaults to the standard search path).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server WebSocket URL, e.g. ws://localhost:17991.
    #[arg(short, long)]
    url: Option<String>,

    /// Device path on the server.
    #[arg(short, long)]
    remote: Option<String>,

    /// Baud rate requested for the remote device.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Local virtual port path; may be repeated.
    #[arg(short = 'p', long = "virtual")]
    virtual_ports: Vec<String>,

    /// Handshake timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log handshake traffic.
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.url {
            config.server.url = url;
        }
        if let Some(remote) = self.remote {
            config.serial.remote_path = remote;
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if !self.virtual_ports.is_empty() {
            config.serial.virtual_ports = self.virtual_ports;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.session.handshake_timeout_ms = timeout_ms;
        }
        if self.debug {
            config.session.debug = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loader = match args.config {
        Some(ref path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let mut config = loader.into_config();
    args.apply(&mut config);
    config.validate()?;

    logging::init(&config.logging)?;

    let client = RemoteSerialClient::from_config(&config)?;
    let session = client.connect(&config.serial.remote_path, Some(config.serial.open_options()))?;
    info!(
        url = %config.server.url,
        remote = %config.serial.remote_path,
        "waiting for handshake"
    );
    session
        .wait_ready(Some(config.session.handshake_timeout()))
        .await?;

    let mut streams = Vec::new();
    for path in &config.serial.virtual_ports {
        let instance = session.create_port(path, None)?;
        streams.push(instance.get_port(Some(config.serial.open_options()))?);
    }
    let Some(stream) = streams.first().cloned() else {
        return Err("no virtual port configured".into());
    };
    if streams.len() > 1 {
        info!(bridged = stream.path(), ports = ?session.ports(), "only the first virtual port is bridged to the terminal");
    }

    tokio::select! {
        result = bridge(stream) => {
            if let Err(e) = result {
                error!(error = %e, "bridge stopped");
            }
        }
        _ = shutdown_signal() => {}
    }

    shutdown(&session);
    Ok(())
}

/// Pipe stdin into the virtual port and the port's inbound data to stdout.
async fn bridge(stream: Arc<VirtualPortStream>) -> std::io::Result<()> {
    tokio::select! {
        result = pump_stdin(&stream) => result,
        result = pump_stdout(&stream) => result,
    }
}

async fn pump_stdin(stream: &VirtualPortStream) -> std::io::Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 1024];
    loop {
        let n = stdin.read(&mut buf).await?;
        if n == 0 {
            info!("stdin closed");
            return Ok(());
        }
        stream.write(&buf[..n])?;
    }
}

async fn pump_stdout(stream: &VirtualPortStream) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.recv(&mut buf).await?;
        stdout.write_all(&buf[..n]).await?;
        stdout.flush().await?;
    }
}

fn shutdown(session: &Session) {
    for path in session.ports() {
        if let Err(e) = session.remove_port(&path) {
            warn!(%path, error = %e, "failed to remove virtual port");
        }
    }
    session.disconnect();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, shutting down");
}
