//! osgrep-server binary — runs `initialSync` to readiness, then serves the search HTTP
//! API. Flags plus `OSGREP_*`/`MXBAI_STORE` env vars configure the server shell; see
//! `osgrep_core::config` for precedence.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use osgrep_server::config::ServerConfig;
use osgrep_server::http::{build_router, shutdown_signal, AppState};
use osgrep_server::syncer::Syncer;
use osgrep_server::worker_client::{default_pool_config, WorkerClient};

#[derive(Parser)]
#[command(name = "osgrep-server", version, about = "Local semantic code search server")]
struct Cli {
    /// Project root to index and serve (default: current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// TCP port to listen on (default: OSGREP_PORT or 8432)
    #[arg(long)]
    port: Option<u16>,

    /// Store name (default: MXBAI_STORE or "default")
    #[arg(long)]
    store_name: Option<String>,

    /// Number of worker subprocesses
    #[arg(long)]
    worker_count: Option<usize>,

    /// Directory containing the embedding/reranker model artifacts
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Path to the osgrep-worker binary (default: sibling of this executable)
    #[arg(long)]
    worker_binary: Option<PathBuf>,

    /// Enable the experimental watch mode
    #[arg(long)]
    watch: bool,
}

fn resolve_worker_binary(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(p) = explicit {
        return p;
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("osgrep-worker");
            if candidate.exists() {
                return candidate;
            }
        }
    }
    PathBuf::from("osgrep-worker")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("osgrep_server=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let project_root = cli.root.clone().unwrap_or_else(|| std::env::current_dir().unwrap());
    let project_root = project_root.canonicalize().unwrap_or_else(|e| {
        error!(path = %project_root.display(), error = %e, "project root not found");
        std::process::exit(1);
    });

    let config = ServerConfig::resolve(
        project_root.clone(),
        cli.port,
        cli.store_name,
        cli.worker_count,
        cli.model_dir,
        cli.watch,
    );

    let worker_binary = resolve_worker_binary(cli.worker_binary);
    let pool_config = default_pool_config(&config, worker_binary);
    let worker = Arc::new(WorkerClient::start(pool_config));

    let store = match osgrep_store::Store::open_or_create(&config.data_dir(), &config.store_name) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open store");
            std::process::exit(1);
        }
    };
    let store = Arc::new(Mutex::new(store));

    let syncer = Arc::new(Syncer::new(
        config.project_root.clone(),
        config.lock_dir(),
        config.meta_store_path(),
        config.worker_count * 2,
        worker.clone(),
    ));

    info!(root = %config.project_root.display(), "running initial sync");
    {
        let mut store_guard = store.lock().unwrap();
        match syncer.run(&mut store_guard, |progress| {
            if config.profile {
                info!(
                    phase = ?progress.phase,
                    processed = progress.processed,
                    total = progress.total,
                    path = progress.current_path.as_deref().unwrap_or(""),
                    "sync progress"
                );
            }
        }) {
            Ok(report) => info!(
                scanned = report.scanned,
                new = report.new,
                changed = report.changed,
                stale = report.stale,
                indexed = report.indexed,
                errors = report.errors,
                "initial sync complete"
            ),
            Err(e) => {
                error!(error = %e, "initial sync failed");
                std::process::exit(1);
            }
        }
    }

    let _watcher = if config.enable_watch {
        osgrep_server::watch::start_watcher(config.project_root.clone(), syncer.clone(), store.clone())
    } else {
        None
    };

    write_server_json(&config, config.port);

    let state = AppState { project_root: config.project_root.clone(), store: store.clone(), worker: worker.clone() };
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(("127.0.0.1", config.port)).await {
        Ok(l) => l,
        Err(e) => {
            error!(port = config.port, error = %e, "could not bind to port");
            std::process::exit(1);
        }
    };

    info!(port = config.port, "listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();

    info!("stopped accepting, draining pool and closing store");
    worker.destroy(Duration::from_secs(5));
    if let Err(e) = store.lock().unwrap().close() {
        error!(error = %e, "error closing store during shutdown");
    }
}

fn write_server_json(config: &ServerConfig, port: u16) {
    let dir = config.lock_dir();
    if let Err(e) = std::fs::create_dir_all(&dir) {
        error!(error = %e, "failed to create .osgrep directory");
        return;
    }
    let body = serde_json::json!({
        "pid": std::process::id(),
        "port": port,
        "startedAt": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    });
    if let Err(e) = std::fs::write(config.server_json_path(), body.to_string()) {
        error!(error = %e, "failed to write server.json");
    }
}
