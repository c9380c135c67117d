//! API response envelope and error mapping

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::TxError;

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: payload on success, omitted on error
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_FUNDS: i32 = 1002;
    pub const INVALID_AMOUNT: i32 = 1003;
    pub const SAME_ACCOUNT: i32 = 1004;
    pub const BALANCE_LIMIT_EXCEEDED: i32 = 1005;

    // Resource errors (4xxx)
    pub const ACCOUNT_NOT_FOUND: i32 = 4001;
    pub const TRANSACTION_NOT_FOUND: i32 = 4002;
    pub const DUPLICATE_ACCOUNT: i32 = 4091;
    pub const CONFLICT: i32 = 4092;
    pub const TRANSFER_REVERSED: i32 = 4093;
    pub const STEP_FAILED: i32 = 4221;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

/// Error half of every handler result
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
    /// Lost a lock or CAS race; resubmitting may succeed
    pub retryable: bool,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
            retryable: false,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            error_codes::INVALID_PARAMETER,
            msg,
        )
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl From<TxError> for ApiError {
    fn from(e: TxError) -> Self {
        let code = match &e {
            TxError::InvalidRequest(_) => error_codes::INVALID_PARAMETER,
            TxError::InvalidAmount => error_codes::INVALID_AMOUNT,
            TxError::SameAccount => error_codes::SAME_ACCOUNT,
            TxError::InsufficientFunds { .. } => error_codes::INSUFFICIENT_FUNDS,
            TxError::BalanceLimitExceeded { .. } => error_codes::BALANCE_LIMIT_EXCEEDED,
            TxError::AccountNotFound(_) => error_codes::ACCOUNT_NOT_FOUND,
            TxError::TransactionNotFound(_) => error_codes::TRANSACTION_NOT_FOUND,
            TxError::DuplicateAccount(_) => error_codes::DUPLICATE_ACCOUNT,
            TxError::LockAcquisition(_)
            | TxError::OptimisticLock { .. }
            | TxError::InvalidStateTransition(_) => error_codes::CONFLICT,
            TxError::TransferReversed { .. } => error_codes::TRANSFER_REVERSED,
            TxError::StepFailed { .. } => error_codes::STEP_FAILED,
            TxError::LockStore(_) => error_codes::SERVICE_UNAVAILABLE,
            TxError::ReversalFailed { .. } | TxError::Database(_) | TxError::Internal(_) => {
                error_codes::INTERNAL_ERROR
            }
        };
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if e.is_infrastructure() {
            tracing::error!(error_code = e.code(), error = %e, "Store failure");
        } else if status.is_server_error() {
            tracing::error!(error_code = e.code(), error = %e, "Request failed");
        }
        let mut err = Self::new(status, code, format!("{}: {}", e.code(), e));
        err.retryable = e.is_retryable();
        err
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiResponse::<()>::error(self.code, self.msg));
        if self.retryable {
            (self.status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (self.status, body).into_response()
        }
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

/// 200 with the success envelope
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

/// 201 for newly created resources
pub fn created<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

/// 202 for records handed to background processing
pub fn accepted<T>(data: T) -> ApiResult<T> {
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(data))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_success_envelope_serialization() {
        let body = serde_json::to_value(ApiResponse::success(42)).unwrap();
        assert_eq!(body["code"], 0);
        assert_eq!(body["msg"], "ok");
        assert_eq!(body["data"], 42);
    }

    #[test]
    fn test_error_envelope_omits_data() {
        let body = serde_json::to_value(ApiResponse::<()>::error(1001, "bad")).unwrap();
        assert_eq!(body["code"], 1001);
        assert!(body.get("data").is_none());
    }

    #[test]
    fn test_tx_error_mapping() {
        let err = ApiError::from(TxError::InsufficientFunds {
            balance: Decimal::ZERO,
            amount: Decimal::ONE,
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, error_codes::INSUFFICIENT_FUNDS);
        assert!(err.msg.starts_with("INSUFFICIENT_FUNDS"));

        let err = ApiError::from(TxError::AccountNotFound("ACC-9".into()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, error_codes::ACCOUNT_NOT_FOUND);

        let err = ApiError::from(TxError::LockAcquisition("lock:account:A".into()));
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, error_codes::CONFLICT);

        let err = ApiError::from(TxError::LockStore("refused".into()));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!err.retryable);

        let err = ApiError::from(TxError::BalanceLimitExceeded {
            balance: Decimal::ONE,
            amount: Decimal::ONE,
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, error_codes::BALANCE_LIMIT_EXCEEDED);
    }

    #[test]
    fn test_contention_sets_retry_after() {
        let err = ApiError::from(TxError::OptimisticLock { retries: 3 });
        assert!(err.retryable);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");

        let response = ApiError::from(TxError::SameAccount).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
