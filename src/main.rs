//! fintx server
//!
//! ```text
//! config/{env}.yaml ─▶ stores (postgres+redis | memory) ─▶ service + sagas
//!                                                              │
//!                                  ┌───────────────────────────┤
//!                                  ▼                           ▼
//!                             HTTP gateway             reconcile worker
//! ```
//!
//! Usage: `fintx --env dev`

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use fintx::account::{AccountStore, MemoryAccountStore, PgAccountStore};
use fintx::config::{AppConfig, Backend};
use fintx::db::Database;
use fintx::gateway::{self, AppState};
use fintx::lock::{LockConfig, LockStore, MemoryLockStore, RedisLockStore};
use fintx::logging::init_logging;
use fintx::reconcile::{ReconcileWorker, WorkerConfig};
use fintx::saga::SagaOrchestrator;
use fintx::transaction::{
    MemoryTransactionStore, PgTransactionStore, TransactionService, TransactionStore,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

struct Stores {
    accounts: Arc<dyn AccountStore>,
    transactions: Arc<dyn TransactionStore>,
    locks: Arc<dyn LockStore>,
    db: Option<Arc<Database>>,
}

async fn open_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match config.backend {
        Backend::Memory => {
            warn!("Memory backend selected: all state is lost on restart");
            Ok(Stores {
                accounts: Arc::new(MemoryAccountStore::new()),
                transactions: Arc::new(MemoryTransactionStore::new()),
                locks: Arc::new(MemoryLockStore::new()),
                db: None,
            })
        }
        Backend::Postgres => {
            let postgres_url = config
                .postgres_url
                .as_deref()
                .context("postgres_url is not set")?;
            let redis_url = config.redis_url.as_deref().context("redis_url is not set")?;

            let db = Database::connect(postgres_url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.init_schema()
                .await
                .context("Failed to initialize schema")?;
            info!("PostgreSQL connected");

            let locks = RedisLockStore::connect(redis_url)
                .await
                .context("Failed to connect to Redis")?;
            info!("Redis lock store connected");

            let pool = db.pool().clone();
            Ok(Stores {
                accounts: Arc::new(PgAccountStore::new(pool.clone())),
                transactions: Arc::new(PgTransactionStore::new(pool)),
                locks: Arc::new(locks),
                db: Some(Arc::new(db)),
            })
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&config);

    info!(
        env = %env,
        version = env!("GIT_HASH"),
        backend = ?config.backend,
        "Starting fintx"
    );

    let stores = open_stores(&config).await?;
    let service = Arc::new(TransactionService::with_config(
        stores.accounts.clone(),
        stores.transactions.clone(),
        stores.locks.clone(),
        LockConfig::from(&config.lock),
        config.processing.max_retries,
    ));
    let sagas = Arc::new(SagaOrchestrator::standard(
        stores.accounts.clone(),
        stores.transactions.clone(),
        config.processing.max_retries,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconcile_handle = if config.reconcile.enabled {
        let worker = ReconcileWorker::new(
            service.clone(),
            sagas.clone(),
            WorkerConfig::from(&config.reconcile),
        );
        Some(tokio::spawn(async move { worker.run(shutdown_rx).await }))
    } else {
        info!("Reconcile worker disabled");
        None
    };

    let mut state = AppState::new(service, sagas);
    if let Some(db) = stores.db {
        state = state.with_database(db);
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };
    let result = gateway::run_server(&config.gateway, Arc::new(state), shutdown).await;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = reconcile_handle {
        let _ = handle.await;
    }

    info!("fintx stopped");
    result
}
