//! Filedrop server binary
//!
//! Process concerns live here: configuration loading and validation,
//! logging, store construction, signal handling, and exit codes.
//!
//! Exit codes: 0 normal shutdown, 1 configuration or secret validation
//! failure, 2 metadata store/migration failure, 3 bind failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use filedrop_core::config::Config;
use filedrop_core::domain::newtypes::UserId;
use filedrop_core::domain::User;
use filedrop_core::ports::IMetadataStore;
use filedrop_object::S3ObjectStore;
use filedrop_server::{build_app, routes::build_router};
use filedrop_store::{DatabasePool, SqliteMetadataStore};

const EXIT_CONFIG: i32 = 1;
const EXIT_MIGRATION: i32 = 2;
const EXIT_BIND: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "filedrop-server", about = "Secure file drop service")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, short, default_value = "filedrop.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {e}", args.config.display());
            std::process::exit(EXIT_CONFIG);
        }
    };
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("config: {problem}");
        }
        std::process::exit(EXIT_CONFIG);
    }

    // Metadata store (migrations run on connect).
    let db = match DatabasePool::new(
        &db_path_from_dsn(&config.metadata.dsn),
        config.metadata.max_connections,
    )
    .await
    {
        Ok(db) => db,
        Err(e) => {
            eprintln!("metadata store unavailable: {e}");
            std::process::exit(EXIT_MIGRATION);
        }
    };
    let metadata: Arc<dyn IMetadataStore> =
        Arc::new(SqliteMetadataStore::new(db.pool().clone()));

    // Bootstrap the admin principal before the first request.
    if let Some(admin_id) = &config.security.admin_user_id {
        // Shape was checked by validate(); a failure here is a bug.
        let id: UserId = match admin_id.parse() {
            Ok(id) => id,
            Err(e) => {
                eprintln!("config: admin_user_id: {e}");
                std::process::exit(EXIT_CONFIG);
            }
        };
        if let Err(e) = metadata.upsert_user(&User::new(id, None, true)).await {
            eprintln!("admin bootstrap failed: {e}");
            std::process::exit(EXIT_MIGRATION);
        }
    }

    let objects = Arc::new(S3ObjectStore::from_config(&config.object_store));

    let app = build_app(&config, metadata, objects);
    let shutdown = app.shutdown.clone();
    let worker_handle = tokio::spawn(app.hash_worker.run());
    let reaper_handle = app.reaper.map(|reaper| tokio::spawn(reaper.run()));

    let router = build_router(app.state);
    let listener = match tokio::net::TcpListener::bind(&config.server.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("cannot bind {}: {e}", config.server.bind_addr);
            std::process::exit(EXIT_BIND);
        }
    };
    tracing::info!(addr = %config.server.bind_addr, "filedrop listening");

    // Stop accepting on the first signal; in-flight requests get the
    // configured grace period before the process moves on.
    let signal = tokio_util::sync::CancellationToken::new();
    {
        let signal = signal.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            signal.cancel();
        });
    }

    let serve = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown({
        let signal = signal.clone();
        async move { signal.cancelled().await }
    });

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server error");
            }
        }
        _ = async { signal.cancelled().await; tokio::time::sleep(grace).await } => {
            tracing::warn!(grace_secs = grace.as_secs(), "drain grace elapsed, dropping in-flight requests");
        }
    }

    // Drain background work, then close the stores.
    shutdown.cancel();
    if let Some(handle) = reaper_handle {
        let _ = handle.await;
    }
    let _ = tokio::time::timeout(Duration::from_secs(30), worker_handle).await;
    db.close().await;
    tracing::info!("shutdown complete");
}

/// Resolves the SQLite file path from the configured DSN
///
/// Accepts `sqlite://<path>`, `sqlite:<path>`, or a bare path.
fn db_path_from_dsn(dsn: &str) -> PathBuf {
    let path = dsn
        .strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))
        .unwrap_or(dsn);
    Path::new(path).to_path_buf()
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining");
}
