//! Saga kinds, their step lists and the step payload

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{TxError, TxResult};
use crate::transaction::{ServiceName, StepDefinition, TransactionType};

// Step names
pub const VALIDATE_ACCOUNT: &str = "validate_account";
pub const VALIDATE_SOURCE_ACCOUNT: &str = "validate_source_account";
pub const VALIDATE_TARGET_ACCOUNT: &str = "validate_target_account";
pub const CHECK_BALANCE: &str = "check_balance";
pub const CHECK_SOURCE_BALANCE: &str = "check_source_balance";
pub const UPDATE_BALANCE: &str = "update_balance";
pub const DECREASE_SOURCE_BALANCE: &str = "decrease_source_balance";
pub const INCREASE_TARGET_BALANCE: &str = "increase_target_balance";
pub const RECORD_TRANSACTION: &str = "record_transaction";
pub const PROCESS_PAYMENT: &str = "process_payment";
pub const SEND_NOTIFICATION: &str = "send_notification";

/// Kind of multi-step transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl SagaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaKind::Deposit => "DEPOSIT",
            SagaKind::Withdrawal => "WITHDRAWAL",
            SagaKind::Transfer => "TRANSFER",
        }
    }

    /// Type of the transaction record that tracks the saga
    pub fn tx_type(&self) -> TransactionType {
        match self {
            SagaKind::Deposit => TransactionType::Credit,
            SagaKind::Withdrawal => TransactionType::Debit,
            SagaKind::Transfer => TransactionType::TransferDebit,
        }
    }
}

impl fmt::Display for SagaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Data every step of a saga receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaPayload {
    pub account_number: String,
    #[serde(default)]
    pub recipient_account: Option<String>,
    pub amount: Decimal,
    pub transaction_type: SagaKind,
}

impl SagaPayload {
    pub fn to_value(&self) -> TxResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &serde_json::Value) -> TxResult<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn recipient(&self) -> TxResult<&str> {
        self.recipient_account
            .as_deref()
            .ok_or_else(|| TxError::InvalidRequest("recipient_account is required".into()))
    }
}

/// Ordered step list per saga kind
#[derive(Debug, Clone, Default)]
pub struct SagaDefinitions {
    steps: HashMap<SagaKind, Vec<StepDefinition>>,
}

impl SagaDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the step list for `kind`
    pub fn with(mut self, kind: SagaKind, steps: Vec<StepDefinition>) -> Self {
        self.steps.insert(kind, steps);
        self
    }

    pub fn steps_for(&self, kind: SagaKind) -> &[StepDefinition] {
        self.steps.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Deposit, withdrawal and transfer flows.
    ///
    /// Only balance mutations and the payment step are reversible.
    pub fn standard() -> Self {
        use ServiceName::{Account, Audit, Notification, Payment};

        Self::new()
            .with(
                SagaKind::Deposit,
                vec![
                    StepDefinition::new(VALIDATE_ACCOUNT, Account, false),
                    StepDefinition::new(UPDATE_BALANCE, Account, true),
                    StepDefinition::new(RECORD_TRANSACTION, Audit, false),
                    StepDefinition::new(SEND_NOTIFICATION, Notification, false),
                ],
            )
            .with(
                SagaKind::Withdrawal,
                vec![
                    StepDefinition::new(VALIDATE_ACCOUNT, Account, false),
                    StepDefinition::new(CHECK_BALANCE, Account, false),
                    StepDefinition::new(UPDATE_BALANCE, Account, true),
                    StepDefinition::new(RECORD_TRANSACTION, Audit, false),
                    StepDefinition::new(SEND_NOTIFICATION, Notification, false),
                ],
            )
            .with(
                SagaKind::Transfer,
                vec![
                    StepDefinition::new(VALIDATE_SOURCE_ACCOUNT, Account, false),
                    StepDefinition::new(VALIDATE_TARGET_ACCOUNT, Account, false),
                    StepDefinition::new(CHECK_SOURCE_BALANCE, Account, false),
                    StepDefinition::new(DECREASE_SOURCE_BALANCE, Account, true),
                    StepDefinition::new(INCREASE_TARGET_BALANCE, Account, true),
                    StepDefinition::new(RECORD_TRANSACTION, Audit, false),
                    StepDefinition::new(PROCESS_PAYMENT, Payment, true),
                    StepDefinition::new(SEND_NOTIFICATION, Notification, false),
                ],
            )
    }
}
