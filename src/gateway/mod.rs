//! HTTP Gateway
//!
//! Thin axum layer over [`TransactionService`](crate::transaction::TransactionService)
//! and [`SagaOrchestrator`](crate::saga::SagaOrchestrator). Every response uses
//! the `{code, msg, data}` envelope.
//!
//! ```text
//! POST /api/v1/accounts                     create account
//! GET  /api/v1/accounts/{account_number}    balance + version
//! POST /api/v1/transactions                 credit/debit (processed async)
//! GET  /api/v1/transactions               newest first, optional account_number
//! GET  /api/v1/transactions/{id}            record + saga steps
//! POST /api/v1/transfers                    locked debit/credit pair
//! POST /api/v1/sagas                        saga (executed async)
//! GET  /health
//! ```

pub mod handlers;
pub mod state;
pub mod types;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;

use crate::config::GatewayConfig;
pub use state::AppState;

/// Build the full route table
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/accounts", post(handlers::create_account))
        .route("/accounts/{account_number}", get(handlers::get_account))
        .route(
            "/transactions",
            post(handlers::create_transaction).get(handlers::list_transactions),
        )
        .route(
            "/transactions/{transaction_id}",
            get(handlers::get_transaction),
        )
        .route("/transfers", post(handlers::create_transfer))
        .route("/sagas", post(handlers::create_saga));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api)
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn run_server(
    config: &GatewayConfig,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(addr = %addr, "Gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Gateway server error")?;

    tracing::info!("Gateway stopped");
    Ok(())
}
