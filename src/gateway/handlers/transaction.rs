//! Single credit/debit handlers and transaction queries

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};

use super::super::state::AppState;
use super::super::types::{
    ApiError, ApiResult, CreateTransactionRequest, ListTransactionsQuery, accepted, ok,
    validate_request,
};
use crate::transaction::{
    MAX_LIST_LIMIT, Transaction, TransactionDetail, TransactionId, TransactionType,
};

/// POST /api/v1/transactions
///
/// Records a PENDING credit or debit and processes it in the background.
/// Poll the returned id for the outcome.
pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTransactionRequest>,
) -> ApiResult<Transaction> {
    validate_request(&req)?;
    if !matches!(
        req.transaction_type,
        TransactionType::Credit | TransactionType::Debit
    ) {
        return ApiError::bad_request("transaction_type must be CREDIT or DEBIT; use /transfers")
            .into_err();
    }

    let tx = state
        .service
        .create_transaction(
            &req.account_number,
            req.transaction_type,
            req.amount.inner(),
            req.description,
        )
        .await?;

    let service = state.service.clone();
    let id = tx.transaction_id;
    tokio::spawn(async move {
        if let Err(e) = service.process_transaction(id).await {
            tracing::warn!(transaction_id = %id, error = %e, "Background processing failed");
        }
    });

    accepted(tx)
}

/// GET /api/v1/transactions?account_number=..&limit=..
///
/// Without `account_number`, lists the newest transactions of all accounts.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTransactionsQuery>,
) -> ApiResult<Vec<Transaction>> {
    validate_request(&query)?;
    let limit = query.limit.unwrap_or(MAX_LIST_LIMIT);
    let txs = match query.account_number.as_deref() {
        Some(number) => state.service.list_transactions(number, limit).await?,
        None => state.service.list_recent(limit).await?,
    };
    ok(txs)
}

/// GET /api/v1/transactions/{transaction_id}
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> ApiResult<TransactionDetail> {
    let id: TransactionId = raw_id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid transaction_id: {}", raw_id)))?;
    let detail = state.service.get_transaction(id).await?;
    ok(detail)
}
