use clap::Parser;
use miette::{IntoDiagnostic, Result};
use panelsync::application::engine::Engine;
use panelsync::application::scheduler::ScheduleConfig;
use panelsync::config::Settings;
use panelsync::domain::ports::LifecycleStoreRef;
use panelsync::domain::tariff::TariffCatalog;
use panelsync::infrastructure::gateway::GatewayClient;
use panelsync::infrastructure::in_memory::InMemoryStore;
use panelsync::infrastructure::notifier::LogNotifier;
use panelsync::infrastructure::panel::PanelClient;
use panelsync::infrastructure::session::{RetryPolicy, SessionCache, SessionClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// JSON file with the tariff catalog. The built-in catalog is used otherwise.
    #[arg(long)]
    tariffs: Option<PathBuf>,

    /// Seconds between expiry sweeps.
    #[arg(long, default_value_t = 60)]
    expiry_interval: u64,

    /// Seconds between endpoint health sweeps.
    #[arg(long, default_value_t = 600)]
    health_interval: u64,

    /// Seconds between stale payment sweeps.
    #[arg(long, default_value_t = 3600)]
    stale_interval: u64,

    /// Seconds between payment ledger polls.
    #[arg(long, default_value_t = 30)]
    poll_interval: u64,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            expiry_sweep: Duration::from_secs(self.expiry_interval.max(1)),
            health_sweep: Duration::from_secs(self.health_interval.max(1)),
            stale_payment_sweep: Duration::from_secs(self.stale_interval.max(1)),
            payment_poll: Duration::from_secs(self.poll_interval.max(1)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = open_store(cli.db_path.as_ref())?;

    let tariffs = match &cli.tariffs {
        Some(path) => {
            let json = std::fs::read_to_string(path).into_diagnostic()?;
            TariffCatalog::from_json(&json).into_diagnostic()?
        }
        None => TariffCatalog::default(),
    };

    let settings = Settings::from_env().into_diagnostic()?;
    info!(
        endpoints = settings.endpoints.len(),
        tariffs = tariffs.all().len(),
        "configuration loaded"
    );

    let policy = RetryPolicy::default();
    let session = SessionClient::new(Arc::new(SessionCache::new()), policy).into_diagnostic()?;
    let panel = PanelClient::new(settings.endpoints, session);
    let gateway = GatewayClient::new(settings.gateway, policy).into_diagnostic()?;

    let engine = Engine::new(
        store,
        Arc::new(panel),
        Arc::new(gateway),
        Arc::new(LogNotifier),
        tariffs,
    );
    let scheduler = engine.start(cli.schedule());

    tokio::signal::ctrl_c().await.into_diagnostic()?;
    info!("shutdown requested");
    scheduler.shutdown().await;

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<&PathBuf>) -> Result<LifecycleStoreRef> {
    use panelsync::infrastructure::rocksdb::RocksDBStore;

    let store: LifecycleStoreRef = match db_path {
        Some(path) => Arc::new(RocksDBStore::open(path).into_diagnostic()?),
        None => Arc::new(InMemoryStore::new()),
    };
    Ok(store)
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<&PathBuf>) -> Result<LifecycleStoreRef> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}
