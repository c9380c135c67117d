//! Gateway types
//!
//! - [`StrictDecimal`]: format-validated amount input
//! - request bodies with field validation
//! - [`ApiResponse<T>`] envelope and [`ApiError`] mapping from core errors

pub mod money;
pub mod requests;
pub mod response;

pub use money::StrictDecimal;
pub use requests::{
    CreateAccountRequest, CreateSagaRequest, CreateTransactionRequest, ListTransactionsQuery,
    TransferRequest, validate_request,
};
pub use response::{ApiError, ApiResponse, ApiResult, accepted, created, error_codes, ok};
