//! Transaction Core Types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::state::{StepStatus, TxStatus};
use crate::account::BalanceDelta;

/// Transaction ID - random 128-bit UUID rendered as text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(uuid::Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn inner(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionType {
    Credit = 1,
    Debit = 2,
    /// Source leg of a transfer
    TransferDebit = 3,
    /// Destination leg of a transfer
    TransferCredit = 4,
}

impl TransactionType {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionType::Credit),
            2 => Some(TransactionType::Debit),
            3 => Some(TransactionType::TransferDebit),
            4 => Some(TransactionType::TransferCredit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "CREDIT",
            TransactionType::Debit => "DEBIT",
            TransactionType::TransferDebit => "TRANSFER_DEBIT",
            TransactionType::TransferCredit => "TRANSFER_CREDIT",
        }
    }

    pub fn is_debit(&self) -> bool {
        matches!(self, TransactionType::Debit | TransactionType::TransferDebit)
    }

    /// Balance change this type applies for `amount`
    pub fn delta(&self, amount: Decimal) -> BalanceDelta {
        if self.is_debit() {
            BalanceDelta::Debit(amount)
        } else {
            BalanceDelta::Credit(amount)
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub account_id: i64,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub status: TxStatus,
    /// Shared by both legs of a transfer and its reversal
    pub reference_id: Option<String>,
    pub description: Option<String>,
    /// Driven by the saga orchestrator; set at insert, never changed
    pub saga: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert parameters for a new PENDING transaction
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_id: TransactionId,
    pub account_id: i64,
    pub amount: Decimal,
    pub tx_type: TransactionType,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub saga: bool,
}

impl NewTransaction {
    pub fn new(account_id: i64, amount: Decimal, tx_type: TransactionType) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            account_id,
            amount,
            tx_type,
            reference_id: None,
            description: None,
            saga: false,
        }
    }

    /// Mark as a saga record, so only the orchestrator ever drives it
    pub fn as_saga(mut self) -> Self {
        self.saga = true;
        self
    }

    pub fn with_reference(mut self, reference_id: &str) -> Self {
        self.reference_id = Some(reference_id.to_string());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Materialize as a PENDING record
    pub fn into_record(self) -> Transaction {
        let now = Utc::now();
        Transaction {
            transaction_id: self.transaction_id,
            account_id: self.account_id,
            amount: self.amount,
            tx_type: self.tx_type,
            status: TxStatus::Pending,
            reference_id: self.reference_id,
            description: self.description,
            saga: self.saga,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Service that owns a saga step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceName {
    #[serde(rename = "account_service")]
    Account,
    #[serde(rename = "payment_service")]
    Payment,
    #[serde(rename = "notification_service")]
    Notification,
    #[serde(rename = "audit_service")]
    Audit,
}

impl ServiceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceName::Account => "account_service",
            ServiceName::Payment => "payment_service",
            ServiceName::Notification => "notification_service",
            ServiceName::Audit => "audit_service",
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account_service" => Ok(ServiceName::Account),
            "payment_service" => Ok(ServiceName::Payment),
            "notification_service" => Ok(ServiceName::Notification),
            "audit_service" => Ok(ServiceName::Audit),
            other => Err(format!("unknown service: {}", other)),
        }
    }
}

/// One entry of a saga's ordered step list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDefinition {
    pub step_name: String,
    pub service: ServiceName,
    /// Whether the step has an undo; only reversible steps get a
    /// compensation payload
    pub reversible: bool,
}

impl StepDefinition {
    pub fn new(step_name: &str, service: ServiceName, reversible: bool) -> Self {
        Self {
            step_name: step_name.to_string(),
            service,
            reversible,
        }
    }
}

/// Persisted saga step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionStep {
    /// Sequence number; ascending id is execution order
    pub id: i64,
    pub transaction_id: TransactionId,
    pub step_name: String,
    pub service_name: ServiceName,
    pub status: StepStatus,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Step listing order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOrder {
    Forward,
    Reverse,
}

/// Transaction with its saga steps (empty for plain transactions)
#[derive(Debug, Clone, Serialize)]
pub struct TransactionDetail {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub steps: Vec<TransactionStep>,
}

/// Result of a successful transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub reference_id: String,
    pub debit: Transaction,
    pub credit: Transaction,
}
