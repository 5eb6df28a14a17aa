//! ptyhub demo binary
//!
//! Bridges one PTY session to the local stdio: shell output is written raw
//! to stdout and stdin is forwarded as session input. Exits when the shell
//! exits or on Ctrl+C / SIGTERM.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ptyhub::{SessionConfig, SessionRegistry};

/// PTY session manager demo: one shell bridged to stdio
#[derive(Parser, Debug)]
#[command(name = "ptyhub")]
#[command(version, about, long_about = None)]
struct Args {
    /// Working directory for the shell
    #[arg(short, long, default_value = ".")]
    workdir: PathBuf,

    /// Shell binary to spawn (defaults to $SHELL, then /bin/sh)
    #[arg(short, long)]
    shell: Option<String>,

    /// Path to a JSON session config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session name shown in logs
    #[arg(short, long, default_value = "shell")]
    name: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("ptyhub v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match args.config {
        Some(ref path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(shell) = args.shell {
        config = config.with_shell(shell);
    }

    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    let registry = Arc::new(SessionRegistry::new(
        config,
        |_id: &String, data: &[u8]| {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(data);
            let _ = stdout.flush();
        },
        move |id: &String| {
            let _ = exit_tx.send(id.clone());
        },
    ));

    let id = registry.create(&args.name, args.workdir.clone())?;
    info!("Session {} started; exit the shell or press Ctrl+C to quit", id);

    // Forward stdin to the session; runs on a blocking thread since stdin
    // reads block indefinitely
    let input_registry = Arc::clone(&registry);
    let input_id = id.clone();
    tokio::task::spawn_blocking(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if input_registry.write(&input_id, &buf[..n]).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Initiating shutdown...");
        }
        exited = exit_rx.recv() => {
            if let Some(exited) = exited {
                info!("Session {} exited", exited);
            }
        }
    }

    registry.close_all();
    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
