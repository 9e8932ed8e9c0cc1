//! Binary entry point: loads the config, wires the managers/core, starts
//! the config-file watcher and the DNS listener, and waits for a shutdown
//! signal. Grounded on the teacher's `main.rs`/`config_reload.rs` startup
//! sequence (tracing init -> config load -> resolver/managers -> listener),
//! simplified to this crate's single-binary, no-HTTP-admin scope (spec §1
//! "Out of scope": the HTTP admin API is an external collaborator).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use heimdall_forwarder::backend::LoggingMarkBackend;
use heimdall_forwarder::config::Config;
use heimdall_forwarder::config_watcher::ConfigWatcher;
use heimdall_forwarder::core::DnsCore;
use heimdall_forwarder::managers::Managers;
use heimdall_forwarder::metrics::Metrics;

#[derive(Parser, Debug)]
#[command(name = "heimdall-forwarder", about = "Recursive-forwarding DNS proxy")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "heimdall.toml")]
    config: PathBuf,

    /// Disable the config-file watcher (hot reload still available via the
    /// admin surface once an embedding binary mounts it).
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = %args.config.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };

    let metrics = match Metrics::new() {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => {
            error!(error = %e, "failed to initialize metrics registry");
            std::process::exit(1);
        }
    };

    let listen_udp = config.listen.udp.clone();
    let listen_tcp = config.listen.tcp.clone();

    let mark_backend: Arc<dyn heimdall_forwarder::backend::MarkBackend> =
        Arc::new(LoggingMarkBackend);

    let managers = match Managers::new(
        config,
        Some(args.config.clone()),
        metrics.clone(),
        Some(mark_backend),
    ) {
        Ok(managers) => managers,
        Err(e) => {
            error!(error = %e, "failed to initialize managers from configuration");
            std::process::exit(1);
        }
    };

    let core = DnsCore::new(managers, metrics);

    if !args.no_watch {
        ConfigWatcher::new(args.config.clone(), core.clone()).spawn();
    }

    let core_for_listener = core.clone();
    let listener = tokio::spawn(async move { core_for_listener.start(&listen_udp, &listen_tcp).await });

    tokio::select! {
        result = listener => {
            match result {
                Ok(Ok(())) => info!("listener exited"),
                Ok(Err(e)) => error!(error = %e, "listener exited with an error"),
                Err(e) => error!(error = %e, "listener task panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    core.shutdown().await;
    warn!("heimdall-forwarder shutting down");
}
