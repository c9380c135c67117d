//! Saga submission

use std::sync::Arc;

use axum::{Json, extract::State};

use super::super::state::AppState;
use super::super::types::{ApiResult, CreateSagaRequest, accepted, validate_request};
use crate::saga::SagaRequest;
use crate::transaction::TransactionDetail;

/// POST /api/v1/sagas
///
/// Persists the saga with its steps and executes it in the background.
pub async fn create_saga(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSagaRequest>,
) -> ApiResult<TransactionDetail> {
    validate_request(&req)?;

    let detail = state
        .sagas
        .create_saga(SagaRequest {
            account_number: req.account_number,
            kind: req.transaction_type,
            amount: req.amount.inner(),
            recipient_account: req.recipient_account,
        })
        .await?;
    state.sagas.spawn_saga(detail.transaction.transaction_id);

    accepted(detail)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{memory_state, open_account};
    use super::*;
    use crate::gateway::types::{StrictDecimal, error_codes};
    use crate::saga::SagaKind;
    use crate::transaction::{StepStatus, TxStatus};
    use axum::http::StatusCode;
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn request(kind: SagaKind, amount: i64, recipient: Option<&str>) -> CreateSagaRequest {
        CreateSagaRequest {
            account_number: "A".into(),
            transaction_type: kind,
            amount: StrictDecimal::from_decimal(Decimal::new(amount, 0)),
            recipient_account: recipient.map(str::to_string),
        }
    }

    async fn wait_terminal(state: &Arc<AppState>, detail: &TransactionDetail) -> TransactionDetail {
        for _ in 0..200 {
            let current = state
                .service
                .get_transaction(detail.transaction.transaction_id)
                .await
                .unwrap();
            if current.transaction.status.is_terminal() {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("saga never reached a terminal status");
    }

    #[tokio::test]
    async fn test_transfer_saga_runs_in_background() {
        let state = memory_state();
        open_account(&state, "A", 100).await;
        open_account(&state, "B", 0).await;

        let (status, Json(body)) = create_saga(
            State(state.clone()),
            Json(request(SagaKind::Transfer, 25, Some("B"))),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        let created = body.data.unwrap();
        assert!(!created.steps.is_empty());
        assert!(created.steps.iter().all(|s| s.status == StepStatus::Pending));

        let done = wait_terminal(&state, &created).await;
        assert_eq!(done.transaction.status, TxStatus::Completed);
        assert!(done.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(
            state.service.get_account("B").await.unwrap().balance,
            Decimal::new(25, 0)
        );
    }

    #[tokio::test]
    async fn test_withdrawal_saga_compensates() {
        let state = memory_state();
        open_account(&state, "A", 10).await;

        let (_, Json(body)) = create_saga(
            State(state.clone()),
            Json(request(SagaKind::Withdrawal, 50, None)),
        )
        .await
        .unwrap();
        let done = wait_terminal(&state, &body.data.unwrap()).await;
        assert_eq!(done.transaction.status, TxStatus::Compensated);
        assert_eq!(
            state.service.get_account("A").await.unwrap().balance,
            Decimal::new(10, 0)
        );
    }

    #[tokio::test]
    async fn test_transfer_saga_requires_recipient() {
        let state = memory_state();
        open_account(&state, "A", 10).await;
        let err = create_saga(State(state), Json(request(SagaKind::Transfer, 5, None)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, error_codes::INVALID_PARAMETER);
    }
}
