//! The boundary binary: parses a handful of CLI flags, loads the typed
//! `Config` (spec.md §6), wires the plugin registry and handler, and
//! runs every configured listener until shutdown. Everything else (the
//! YAML loader, file watching, the full admin API) is out of scope per
//! spec.md §1 — this is deliberately thin.
//!
//! Grounded on the teacher's `bin/heimdall_load_test.rs` for the
//! `clap::Parser` derive shape (the teacher's own `main.rs` is a stale
//! early prototype unrelated to the rest of the crate, so it isn't used
//! as the template here — see DESIGN.md) and on `server.rs`'s listener-
//! spawn-plus-shutdown-broadcast wiring for the run loop.

use clap::Parser;
use flowdns::config::Config;
use flowdns::handler::Handler;
use flowdns::metrics::Metrics;
use flowdns::registry::PluginRegistry;
use flowdns::shutdown::Shutdown;
use flowdns::{CoreError, Result};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// A recursive/forwarding DNS resolver core with a pluggable execution
/// pipeline.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file (spec.md §6's configuration surface).
    /// Absent means run with every default (no upstreams configured,
    /// which will refuse to start — see `PluginRegistry::build_default_engine`).
    #[arg(short, long)]
    config: Option<String>,

    /// Override `RUST_LOG`-style filtering without touching the environment.
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> Result<Config> {
    match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Config::from_toml_str(&text)
        }
        None => {
            warn!("no --config given, running with defaults (no upstreams)");
            Ok(Config::default())
        }
    }
}

fn init_tracing(args: &Args) {
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level.clone()),
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = load_config(&args)?;
    info!(entry_tag = %config.entry_tag, upstreams = config.upstreams.len(), "loaded configuration");

    let metrics = Arc::new(Metrics::new().map_err(|e| CoreError::Internal(e.to_string()))?);
    let shutdown = Arc::new(Shutdown::new());

    let plugin_registry = PluginRegistry::load_from_config(&config).await?;
    let engine = plugin_registry.build_default_engine(&config)?;
    let handler = Arc::new(Handler::new(engine, config.query_deadline(), Arc::clone(&metrics)));

    let mut listener_handles = Vec::new();

    let udp_addr = config.udp_bind.parse().map_err(|e| CoreError::Config(format!("udp_bind: {e}")))?;
    {
        let handler = Arc::clone(&handler);
        let rx = shutdown.subscribe();
        listener_handles.push(tokio::spawn(async move { flowdns::listeners::udp::run(udp_addr, handler, rx).await }));
    }

    let tcp_addr = config.tcp_bind.parse().map_err(|e| CoreError::Config(format!("tcp_bind: {e}")))?;
    {
        let handler = Arc::clone(&handler);
        let rx = shutdown.subscribe();
        listener_handles.push(tokio::spawn(async move { flowdns::listeners::tcp::run(tcp_addr, handler, rx).await }));
    }

    if let Some(tls) = config.tls.clone() {
        let bind_addr = tls.bind.parse().map_err(|e| CoreError::Config(format!("tls.bind: {e}")))?;
        let acceptor = flowdns::listeners::tls::build_acceptor(
            tls.cert_path.as_deref(),
            tls.key_path.as_deref(),
            "flowdns",
        )?;
        let handler = Arc::clone(&handler);
        let rx = shutdown.subscribe();
        listener_handles
            .push(tokio::spawn(async move { flowdns::listeners::tls::run(bind_addr, acceptor, handler, rx).await }));
    }

    if let Some(doh) = config.doh.clone() {
        let bind_addr = doh.bind.parse().map_err(|e| CoreError::Config(format!("doh.bind: {e}")))?;
        let acceptor = if doh.cert_path.is_some() || doh.key_path.is_some() {
            Some(flowdns::listeners::tls::build_acceptor(doh.cert_path.as_deref(), doh.key_path.as_deref(), "flowdns")?)
        } else {
            None
        };
        let handler = Arc::clone(&handler);
        let rx = shutdown.subscribe();
        listener_handles.push(tokio::spawn(async move { flowdns::listeners::doh::run(bind_addr, acceptor, handler, rx).await }));
    }

    if let Some(doq) = config.doq.clone() {
        let bind_addr = doq.bind.parse().map_err(|e| CoreError::Config(format!("doq.bind: {e}")))?;
        let handler = Arc::clone(&handler);
        let rx = shutdown.subscribe();
        listener_handles.push(tokio::spawn(async move {
            flowdns::listeners::doq::run(bind_addr, doq.cert_path.as_deref(), doq.key_path.as_deref(), "flowdns", handler, rx).await
        }));
    }

    {
        let admin_addr = config.admin_bind.parse().map_err(|e| CoreError::Config(format!("admin_bind: {e}")))?;
        let metrics = Arc::clone(&metrics);
        let rx = shutdown.subscribe();
        listener_handles.push(tokio::spawn(async move { flowdns::admin::run(admin_addr, metrics, None, None, rx).await }));
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }
    shutdown.shutdown().await;

    for handle in listener_handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "listener exited with error"),
            Err(e) => error!(error = %e, "listener task panicked"),
        }
    }

    Ok(())
}
