//! Nutrilog API server binary.
//!
//! Serves the authentication API over HTTP, backed by PostgreSQL or, with
//! `--in-memory`, by process-local stores for development.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use nutri_api::AppState;
use nutri_api::config::ApiConfig;
use nutri_core::auth::memory::{MemoryCredentialStore, MemoryRefreshTokenLedger};
use nutri_core::auth::queries::{PgCredentialStore, PgRefreshTokenLedger};
use nutri_core::auth::{AuthService, CredentialStore, RefreshTokenLedger};
use nutri_core::rate_limit::MemoryRateLimitStore;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often expired refresh tokens are swept from the ledger.
const LEDGER_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "nutri_api_server", about = "Nutrilog API server")]
struct Args {
    /// Port to listen on. Overrides the port of `BIND_ADDR`.
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/nutrilog"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Keep users and refresh tokens in memory instead of PostgreSQL.
    #[arg(long, default_value_t = false)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,nutri_api=debug,nutri_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    config.pg_connection_url = args.database_url.clone();
    if let Some(port) = args.port {
        let host = config
            .bind_addr
            .rsplit_once(':')
            .map_or("127.0.0.1", |(host, _)| host);
        config.bind_addr = format!("{host}:{port}");
    }
    if !config.secure_cookies {
        warn!("SECURE_COOKIES disabled, session cookies will be sent over plain HTTP");
    }

    info!(bind_addr = %config.bind_addr, in_memory = args.in_memory, "starting nutri_api_server");

    let (users, ledger): (Arc<dyn CredentialStore>, Arc<dyn RefreshTokenLedger>) =
        if args.in_memory {
            warn!("using in-memory stores, all accounts are lost on exit");
            (
                Arc::new(MemoryCredentialStore::new()),
                Arc::new(MemoryRefreshTokenLedger::new()),
            )
        } else {
            info!(
                database_url = %args.database_url,
                max_connections = args.max_connections,
                "configuring connection pool"
            );
            let pool = PgPoolOptions::new()
                .max_connections(args.max_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(&args.database_url)
                .await?;

            info!("running database migrations");
            nutri_core::migrate::migrate(&pool).await?;

            (
                Arc::new(PgCredentialStore::new(pool.clone())),
                Arc::new(PgRefreshTokenLedger::new(pool)),
            )
        };

    let rate_store = Arc::new(MemoryRateLimitStore::new());
    let longest_window = config
        .auth_rate_limit
        .window
        .max(config.refresh_rate_limit.window)
        .max(config.read_rate_limit.window);
    let cleanup = rate_store.spawn_cleanup_task(longest_window);

    let state = AppState::new(config.clone(), users, ledger, rate_store);
    let shutdown = CancellationToken::new();
    let sweeper = spawn_ledger_sweep(state.auth.clone(), shutdown.clone());

    let app = nutri_api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
                _ = shutdown.cancelled() => {}
            }
        }
    })
    .await;

    shutdown.cancel();
    cleanup.abort();
    let _ = sweeper.await;

    result?;
    Ok(())
}

/// Periodically delete expired refresh tokens until `shutdown` fires.
fn spawn_ledger_sweep(
    auth: Arc<AuthService>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LEDGER_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => match auth.purge_expired_tokens().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "expired refresh tokens removed"),
                    Err(e) => warn!(error = %e, "refresh token sweep failed"),
                },
            }
        }
    })
}
