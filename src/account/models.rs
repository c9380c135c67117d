//! Account data model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{TxError, TxResult};

/// Largest balance the `NUMERIC(30, 8)` column holds (10^22 - 1)
pub const MAX_BALANCE: Decimal = Decimal::from_parts(2_990_538_751, 434_162_106, 542, false, 0);

/// Transaction amounts are positive and never larger than a balance can be
pub fn validate_amount(amount: Decimal) -> TxResult<()> {
    if amount <= Decimal::ZERO || amount > MAX_BALANCE {
        return Err(TxError::InvalidAmount);
    }
    Ok(())
}

/// Account balance row
///
/// `version` starts at 1 and is bumped by every successful balance write.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub account_number: String,
    pub balance: Decimal,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: i64, account_number: &str, balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id,
            account_number: account_number.to_string(),
            balance,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

/// Signed balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceDelta {
    Credit(Decimal),
    Debit(Decimal),
}

impl BalanceDelta {
    /// New balance after applying this change.
    ///
    /// Debits may not go negative and credits may not exceed [`MAX_BALANCE`].
    pub fn apply(&self, balance: Decimal) -> TxResult<Decimal> {
        match *self {
            BalanceDelta::Credit(amount) => balance
                .checked_add(amount)
                .filter(|new_balance| *new_balance <= MAX_BALANCE)
                .ok_or(TxError::BalanceLimitExceeded { balance, amount }),
            BalanceDelta::Debit(amount) if balance >= amount => Ok(balance - amount),
            BalanceDelta::Debit(amount) => Err(TxError::InsufficientFunds { balance, amount }),
        }
    }

    /// The change that undoes this one
    pub fn inverse(&self) -> Self {
        match *self {
            BalanceDelta::Credit(a) => BalanceDelta::Debit(a),
            BalanceDelta::Debit(a) => BalanceDelta::Credit(a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_starts_at_version_one() {
        let account = Account::new(1, "ACC-1", Decimal::new(10000, 2));
        assert_eq!(account.version, 1);
        assert!(account.can_cover(Decimal::new(10000, 2)));
        assert!(!account.can_cover(Decimal::new(10001, 2)));
    }

    #[test]
    fn test_delta_apply() {
        let balance = Decimal::new(10000, 2);
        assert_eq!(
            BalanceDelta::Credit(Decimal::new(50, 0)).apply(balance).unwrap(),
            Decimal::new(15000, 2)
        );
        assert_eq!(
            BalanceDelta::Debit(Decimal::new(100, 0)).apply(balance).unwrap(),
            Decimal::ZERO
        );
        assert!(matches!(
            BalanceDelta::Debit(Decimal::new(101, 0)).apply(balance),
            Err(TxError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_credit_never_overflows() {
        assert_eq!(MAX_BALANCE.to_string(), "9999999999999999999999");
        assert_eq!(
            BalanceDelta::Credit(Decimal::ONE)
                .apply(MAX_BALANCE - Decimal::ONE)
                .unwrap(),
            MAX_BALANCE
        );
        assert!(matches!(
            BalanceDelta::Credit(Decimal::ONE).apply(MAX_BALANCE),
            Err(TxError::BalanceLimitExceeded { .. })
        ));
        // Would panic with plain `+`
        assert!(matches!(
            BalanceDelta::Credit(Decimal::ONE).apply(Decimal::MAX),
            Err(TxError::BalanceLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_delta_inverse() {
        let d = BalanceDelta::Debit(Decimal::ONE);
        assert_eq!(d.inverse(), BalanceDelta::Credit(Decimal::ONE));
        assert_eq!(d.inverse().inverse(), d);
    }

    #[test]
    fn test_validate_amount_bounds() {
        assert!(validate_amount(Decimal::new(1, 8)).is_ok());
        assert!(validate_amount(MAX_BALANCE).is_ok());
        assert!(matches!(validate_amount(Decimal::ZERO), Err(TxError::InvalidAmount)));
        assert!(matches!(validate_amount(-Decimal::ONE), Err(TxError::InvalidAmount)));
        assert!(matches!(validate_amount(Decimal::MAX), Err(TxError::InvalidAmount)));
    }
}
