//! Step handlers
//!
//! Each `(service, step_name)` pair maps to one [`StepHandler`]. Handlers
//! receive the step's stored JSON payload.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::definitions::{
    CHECK_BALANCE, CHECK_SOURCE_BALANCE, DECREASE_SOURCE_BALANCE, INCREASE_TARGET_BALANCE,
    PROCESS_PAYMENT, RECORD_TRANSACTION, SEND_NOTIFICATION, SagaKind, SagaPayload,
    UPDATE_BALANCE, VALIDATE_ACCOUNT, VALIDATE_SOURCE_ACCOUNT, VALIDATE_TARGET_ACCOUNT,
};
use crate::account::{AccountStore, BalanceDelta, adjust_balance};
use crate::error::{TxError, TxResult};
use crate::transaction::ServiceName;

/// Forward action and undo for one saga step
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, payload: &Value) -> TxResult<()>;

    /// Undo a completed `execute`. Only called for steps that carry a
    /// compensation payload.
    async fn compensate(&self, _payload: &Value) -> TxResult<()> {
        Ok(())
    }
}

/// Which account of the payload a handler works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Owner,
    Recipient,
}

impl Party {
    fn account_number<'a>(&self, payload: &'a SagaPayload) -> TxResult<&'a str> {
        match self {
            Party::Owner => Ok(payload.account_number.as_str()),
            Party::Recipient => payload.recipient(),
        }
    }
}

/// Direction of a balance step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceMove {
    Credit,
    Debit,
    /// Credit for deposits, debit for withdrawals
    ByKind,
}

// ============================================================================
// Account service
// ============================================================================

pub struct ValidateAccount {
    accounts: Arc<dyn AccountStore>,
    party: Party,
}

impl ValidateAccount {
    pub fn new(accounts: Arc<dyn AccountStore>, party: Party) -> Self {
        Self { accounts, party }
    }
}

#[async_trait]
impl StepHandler for ValidateAccount {
    async fn execute(&self, payload: &Value) -> TxResult<()> {
        let payload = SagaPayload::from_value(payload)?;
        let number = self.party.account_number(&payload)?;
        self.accounts
            .get_by_number(number)
            .await?
            .map(|_| ())
            .ok_or_else(|| TxError::AccountNotFound(number.to_string()))
    }
}

pub struct CheckBalance {
    accounts: Arc<dyn AccountStore>,
}

impl CheckBalance {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl StepHandler for CheckBalance {
    async fn execute(&self, payload: &Value) -> TxResult<()> {
        let payload = SagaPayload::from_value(payload)?;
        let account = self
            .accounts
            .get_by_number(&payload.account_number)
            .await?
            .ok_or_else(|| TxError::AccountNotFound(payload.account_number.clone()))?;

        if !account.can_cover(payload.amount) {
            return Err(TxError::InsufficientFunds {
                balance: account.balance,
                amount: payload.amount,
            });
        }
        Ok(())
    }
}

/// Balance mutation through the versioned CAS loop
pub struct AdjustBalance {
    accounts: Arc<dyn AccountStore>,
    party: Party,
    direction: BalanceMove,
    max_retries: u32,
}

impl AdjustBalance {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        party: Party,
        direction: BalanceMove,
        max_retries: u32,
    ) -> Self {
        Self {
            accounts,
            party,
            direction,
            max_retries,
        }
    }

    fn delta(&self, payload: &SagaPayload) -> TxResult<BalanceDelta> {
        let credit = match self.direction {
            BalanceMove::Credit => true,
            BalanceMove::Debit => false,
            BalanceMove::ByKind => match payload.transaction_type {
                SagaKind::Deposit => true,
                SagaKind::Withdrawal => false,
                SagaKind::Transfer => {
                    return Err(TxError::InvalidRequest(
                        "transfer sagas move balances with explicit steps".into(),
                    ));
                }
            },
        };
        Ok(if credit {
            BalanceDelta::Credit(payload.amount)
        } else {
            BalanceDelta::Debit(payload.amount)
        })
    }

    async fn apply(&self, payload: &Value, undo: bool) -> TxResult<()> {
        let payload = SagaPayload::from_value(payload)?;
        let number = self.party.account_number(&payload)?;
        let delta = self.delta(&payload)?;
        let delta = if undo { delta.inverse() } else { delta };

        let account = adjust_balance(self.accounts.as_ref(), number, delta, self.max_retries).await?;
        info!(
            account = %number,
            balance = %account.balance,
            version = account.version,
            undo,
            "Saga balance step applied"
        );
        Ok(())
    }
}

#[async_trait]
impl StepHandler for AdjustBalance {
    async fn execute(&self, payload: &Value) -> TxResult<()> {
        self.apply(payload, false).await
    }

    async fn compensate(&self, payload: &Value) -> TxResult<()> {
        self.apply(payload, true).await
    }
}

// ============================================================================
// Audit / payment / notification services
// ============================================================================

pub struct AuditLog;

#[async_trait]
impl StepHandler for AuditLog {
    async fn execute(&self, payload: &Value) -> TxResult<()> {
        info!(target: "audit", payload = %payload, "Transaction recorded");
        Ok(())
    }
}

pub struct Payment;

#[async_trait]
impl StepHandler for Payment {
    async fn execute(&self, payload: &Value) -> TxResult<()> {
        info!(payload = %payload, "Payment processed");
        Ok(())
    }

    async fn compensate(&self, payload: &Value) -> TxResult<()> {
        info!(payload = %payload, "Payment cancelled");
        Ok(())
    }
}

pub struct Notification;

#[async_trait]
impl StepHandler for Notification {
    async fn execute(&self, payload: &Value) -> TxResult<()> {
        info!(payload = %payload, "Notification sent");
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// `(service, step_name)` → handler
#[derive(Default, Clone)]
pub struct StepRegistry {
    handlers: HashMap<(ServiceName, String), Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a step
    pub fn register(
        &mut self,
        service: ServiceName,
        step_name: &str,
        handler: Arc<dyn StepHandler>,
    ) -> &mut Self {
        self.handlers
            .insert((service, step_name.to_string()), handler);
        self
    }

    pub fn get(&self, service: ServiceName, step_name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers
            .get(&(service, step_name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers for every step of [`SagaDefinitions::standard`](super::SagaDefinitions::standard)
    pub fn standard(accounts: Arc<dyn AccountStore>, max_retries: u32) -> Self {
        use ServiceName::{Account, Audit, Notification as Notify, Payment as Pay};

        let mut registry = Self::new();
        registry
            .register(
                Account,
                VALIDATE_ACCOUNT,
                Arc::new(ValidateAccount::new(accounts.clone(), Party::Owner)),
            )
            .register(
                Account,
                VALIDATE_SOURCE_ACCOUNT,
                Arc::new(ValidateAccount::new(accounts.clone(), Party::Owner)),
            )
            .register(
                Account,
                VALIDATE_TARGET_ACCOUNT,
                Arc::new(ValidateAccount::new(accounts.clone(), Party::Recipient)),
            )
            .register(
                Account,
                CHECK_BALANCE,
                Arc::new(CheckBalance::new(accounts.clone())),
            )
            .register(
                Account,
                CHECK_SOURCE_BALANCE,
                Arc::new(CheckBalance::new(accounts.clone())),
            )
            .register(
                Account,
                UPDATE_BALANCE,
                Arc::new(AdjustBalance::new(
                    accounts.clone(),
                    Party::Owner,
                    BalanceMove::ByKind,
                    max_retries,
                )),
            )
            .register(
                Account,
                DECREASE_SOURCE_BALANCE,
                Arc::new(AdjustBalance::new(
                    accounts.clone(),
                    Party::Owner,
                    BalanceMove::Debit,
                    max_retries,
                )),
            )
            .register(
                Account,
                INCREASE_TARGET_BALANCE,
                Arc::new(AdjustBalance::new(
                    accounts,
                    Party::Recipient,
                    BalanceMove::Credit,
                    max_retries,
                )),
            )
            .register(Audit, RECORD_TRANSACTION, Arc::new(AuditLog))
            .register(Pay, PROCESS_PAYMENT, Arc::new(Payment))
            .register(Notify, SEND_NOTIFICATION, Arc::new(Notification));
        registry
    }
}
