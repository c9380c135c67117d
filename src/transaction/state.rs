//! Transaction and Step State Definitions
//!
//! State IDs are stored in PostgreSQL as SMALLINT.
//!
//! ```text
//! Transaction:  PENDING → PROCESSING → COMPLETED
//!                  ↓           ↓
//!               FAILED ←───────┤
//!                              ↓ (saga only)
//!                        COMPENSATING → COMPENSATED
//!
//! Step:         PENDING → PROCESSING → COMPLETED → COMPENSATING → COMPENSATED
//!                              ↓                         ↓
//!                           FAILED                    FAILED
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{TxError, TxResult};

/// Transaction status
///
/// Terminal states: COMPLETED (40), FAILED (-10), COMPENSATED (-30)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TxStatus {
    /// Recorded, not yet picked up by a worker
    Pending = 0,

    /// A worker holds it; balance write may be in flight
    Processing = 10,

    /// Terminal: balance change applied
    Completed = 40,

    /// Terminal: no balance change applied
    Failed = -10,

    /// Saga rollback in progress
    Compensating = -20,

    /// Terminal: saga rolled back
    Compensated = -30,
}

impl TxStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Completed | TxStatus::Failed | TxStatus::Compensated
        )
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Compensating)
                | (Compensating, Compensated)
        )
    }

    /// [`can_transition_to`](Self::can_transition_to) as an error
    pub fn check_transition(&self, next: TxStatus) -> TxResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TxError::InvalidStateTransition(format!(
                "transaction {} -> {}",
                self, next
            )))
        }
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TxStatus::Pending),
            10 => Some(TxStatus::Processing),
            40 => Some(TxStatus::Completed),
            -10 => Some(TxStatus::Failed),
            -20 => Some(TxStatus::Compensating),
            -30 => Some(TxStatus::Compensated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Processing => "PROCESSING",
            TxStatus::Completed => "COMPLETED",
            TxStatus::Failed => "FAILED",
            TxStatus::Compensating => "COMPENSATING",
            TxStatus::Compensated => "COMPENSATED",
        }
    }

    /// Ids of terminal states, for SQL `NOT IN` filters
    pub fn terminal_ids() -> [i16; 3] {
        [
            TxStatus::Completed.id(),
            TxStatus::Failed.id(),
            TxStatus::Compensated.id(),
        ]
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TxStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TxStatus::from_id(value).ok_or(())
    }
}

/// Saga step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum StepStatus {
    Pending = 0,
    Processing = 10,
    Completed = 40,
    Failed = -10,
    Compensating = -20,
    Compensated = -30,
}

impl StepStatus {
    pub const ALL: [StepStatus; 6] = [
        StepStatus::Pending,
        StepStatus::Processing,
        StepStatus::Completed,
        StepStatus::Failed,
        StepStatus::Compensating,
        StepStatus::Compensated,
    ];

    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Compensating)
                | (Compensating, Compensated)
                | (Compensating, Failed)
        )
    }

    /// States a step may move to `next` from, for conditional SQL updates
    pub fn predecessor_ids(next: StepStatus) -> Vec<i16> {
        Self::ALL
            .iter()
            .filter(|s| s.can_transition_to(next))
            .map(StepStatus::id)
            .collect()
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(StepStatus::Pending),
            10 => Some(StepStatus::Processing),
            40 => Some(StepStatus::Completed),
            -10 => Some(StepStatus::Failed),
            -20 => Some(StepStatus::Compensating),
            -30 => Some(StepStatus::Compensated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Processing => "PROCESSING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Compensating => "COMPENSATING",
            StepStatus::Compensated => "COMPENSATED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
