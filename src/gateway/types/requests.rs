//! Request bodies and query strings

use serde::Deserialize;
use validator::Validate;

use super::StrictDecimal;
use super::response::ApiError;
use crate::saga::SagaKind;
use crate::transaction::TransactionType;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 64))]
    pub account_number: String,
    #[serde(default)]
    pub initial_balance: StrictDecimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTransactionRequest {
    #[validate(length(min = 1, max = 64))]
    pub account_number: String,
    #[serde(alias = "type")]
    pub transaction_type: TransactionType,
    pub amount: StrictDecimal,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransferRequest {
    #[validate(length(min = 1, max = 64))]
    pub from_account: String,
    #[validate(length(min = 1, max = 64))]
    pub to_account: String,
    pub amount: StrictDecimal,
    #[validate(length(max = 255))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSagaRequest {
    #[validate(length(min = 1, max = 64))]
    pub account_number: String,
    #[serde(alias = "kind")]
    pub transaction_type: SagaKind,
    pub amount: StrictDecimal,
    #[validate(length(min = 1, max = 64))]
    pub recipient_account: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListTransactionsQuery {
    /// Omitted: list across all accounts
    #[validate(length(min = 1, max = 64))]
    pub account_number: Option<String>,
    #[validate(range(min = 1))]
    pub limit: Option<usize>,
}

/// Run derive-based field checks, mapping failures to 400
pub fn validate_request<T: Validate>(req: &T) -> Result<(), ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Invalid parameter: {}", e)))
}
