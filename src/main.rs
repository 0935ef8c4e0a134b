use clap::{Parser, Subcommand, ValueEnum};
use gatewaypay::application::engine::{EngineServices, GatewayOptions, PaymentEngine};
use gatewaypay::config::Config;
use gatewaypay::domain::ports::{SharedLedger, SharedMethodStore};
use gatewaypay::gateway::http::HttpTransport;
use gatewaypay::infrastructure::clock::SystemClock;
use gatewaypay::infrastructure::events::TracingEventPublisher;
use gatewaypay::infrastructure::in_memory::{InMemoryLedger, InMemoryPaymentMethodStore};
use gatewaypay::infrastructure::merchants::StaticMerchantDirectory;
use gatewaypay::interfaces::http::router;
use miette::{IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to `gatewaypay.toml`).
    #[arg(long, env = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API until interrupted.
    Serve,
    /// Run one housekeeping sweep and print its report as JSON.
    Sweep {
        #[arg(value_enum)]
        kind: SweepKind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SweepKind {
    /// Verify ACH methods whose grace period has elapsed.
    Ach,
    /// Report expiring authorizations and stale pending transactions.
    Tokens,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).into_diagnostic()?;
    let (ledger, methods) = open_stores(cli.db_path)?;
    let engine = Arc::new(build_engine(&config, ledger, methods)?);

    match cli.command {
        Command::Serve => serve(&config, engine).await,
        Command::Sweep { kind } => {
            let report = match kind {
                SweepKind::Ach => engine.sweep_ach_verifications().await?,
                SweepKind::Tokens => engine.sweep_token_housekeeping().await?,
            };
            println!("{}", serde_json::to_string(&report).into_diagnostic()?);
            Ok(())
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(SharedLedger, SharedMethodStore)> {
    use gatewaypay::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(&path)?;
            tracing::info!(path = %path.display(), "Using RocksDB storage");
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(SharedLedger, SharedMethodStore)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (SharedLedger, SharedMethodStore) {
    (
        Arc::new(InMemoryLedger::new()),
        Arc::new(InMemoryPaymentMethodStore::new()),
    )
}

fn build_engine(config: &Config, ledger: SharedLedger, methods: SharedMethodStore) -> Result<PaymentEngine> {
    let endpoints = config.endpoints().into_diagnostic()?;
    let merchants = config.merchant_credentials();
    if merchants.is_empty() {
        tracing::warn!("No merchants configured; every request will be rejected");
    }
    let transport = HttpTransport::new(
        endpoints.server_direct,
        endpoints.code_exchange,
        config.request_timeout(),
    );

    let services = EngineServices {
        ledger,
        methods,
        events: Arc::new(TracingEventPublisher),
        clock: Arc::new(SystemClock),
        merchants: Arc::new(StaticMerchantDirectory::new(merchants)),
        transport: Arc::new(transport),
    };
    let gateway = GatewayOptions {
        retry: config.retry_policy(),
        hosted_page_url: endpoints.hosted_page,
        callback_url: endpoints.callback,
    };
    Ok(PaymentEngine::new(services, gateway, config.engine_settings()))
}

async fn serve(config: &Config, engine: Arc<PaymentEngine>) -> Result<()> {
    let app = router(engine);
    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    tracing::info!("Payment engine listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    tracing::info!("Payment engine shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not install SIGTERM handler");
                ctrl_c.await;
                tracing::info!("Received Ctrl-C, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
