//! Account handlers

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::state::AppState;
use super::super::types::{ApiResult, CreateAccountRequest, created, ok, validate_request};
use crate::account::Account;

/// POST /api/v1/accounts
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAccountRequest>,
) -> ApiResult<Account> {
    validate_request(&req)?;
    let account = state
        .service
        .create_account(&req.account_number, req.initial_balance.inner())
        .await?;
    created(account)
}

/// GET /api/v1/accounts/{account_number}
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(account_number): Path<String>,
) -> ApiResult<Account> {
    let account = state.service.get_account(&account_number).await?;
    ok(account)
}
