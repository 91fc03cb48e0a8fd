//! `vf-server` -- the HTTP front door (spec §6). Binds an axum listener
//! (ephemeral or fixed per `server.ephemeral_port`), writes a lockfile for
//! dynamic port discovery, runs the Scheduler's startup orphan scan, and
//! drains gracefully on ctrl-c.

use anyhow::{Context, Result};
use tracing::info;

use vf_core::config::Config;
use vf_server::lockfile::ServerLockfile;
use vf_server::state::AppState;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("failed to load config, using defaults: {e}");
        Config::default()
    });

    if config.general.log_json {
        vf_telemetry::logging::init_logging_json("vf-server", &config.general.log_level);
    } else {
        vf_telemetry::logging::init_logging("vf-server", &config.general.log_level);
    }

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "vf-server starting");

    if let Some(existing) = ServerLockfile::read_valid() {
        eprintln!(
            "vf-server already running (pid={}, {})\n  Hint: stop it first, or remove {}",
            existing.pid,
            existing.url(),
            ServerLockfile::path().display(),
        );
        std::process::exit(1);
    }

    let bind_addr = if config.server.ephemeral_port {
        format!("{}:0", config.server.host)
    } else {
        format!("{}:{}", config.server.host, config.server.port)
    };
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind on {bind_addr}"))?;
    let bound = listener.local_addr()?;
    info!(%bound, "listener bound");

    let lockfile = ServerLockfile {
        pid: std::process::id(),
        host: config.server.host.clone(),
        port: bound.port(),
        started_at: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Err(msg) = lockfile.acquire_or_fail() {
        eprintln!("failed to acquire lockfile: {msg}");
        std::process::exit(1);
    }
    info!(path = %ServerLockfile::path().display(), "lockfile written");

    let state = AppState::new(config, num_cpus_hint());
    state.scan_for_orphans().await;

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        ServerLockfile::remove();
        shutdown.trigger();
    });

    let app = vf_server::http::router(state.clone());
    info!(%bound, "vf-server listening");

    let mut shutdown_rx = state.shutdown.subscribe();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await;

    ServerLockfile::remove();
    if let Err(e) = result {
        tracing::error!(error = %e, "server exited with an error");
        return Err(e.into());
    }
    info!("vf-server stopped");
    Ok(())
}

/// A small, fixed worker pool -- this is not a latency-critical sizing
/// decision; the Scheduler's per-user lock is the real concurrency bound.
fn num_cpus_hint() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).clamp(2, 16)
}
