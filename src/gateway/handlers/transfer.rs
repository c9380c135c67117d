//! Account-to-account transfers

use std::sync::Arc;

use axum::{Json, extract::State};

use super::super::state::AppState;
use super::super::types::{ApiResult, TransferRequest, ok, validate_request};
use crate::transaction::TransferOutcome;

/// POST /api/v1/transfers
///
/// Runs synchronously under both account locks. A credit-leg failure that
/// was reversed comes back as 409 `TRANSFER_REVERSED`.
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TransferRequest>,
) -> ApiResult<TransferOutcome> {
    validate_request(&req)?;
    tracing::info!(
        from = %req.from_account,
        to = %req.to_account,
        amount = %req.amount.inner(),
        "Transfer request"
    );

    let outcome = state
        .service
        .transfer(
            &req.from_account,
            &req.to_account,
            req.amount.inner(),
            req.description,
        )
        .await?;
    ok(outcome)
}
