//! Events emitted after a transaction is posted.
//!
//! Publishing is best-effort: the engine logs a failed publish and still
//! reports the posting as successful. Subscribers must tolerate duplicates
//! and gaps.

use std::sync::{Mutex, PoisonError, mpsc};

use chrono::{DateTime, Utc};
use minigl_shared::types::{EventId, Money, TransactionRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outbound ledger event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A transaction (including a completion) was posted.
    TransactionCompleted {
        /// Event id.
        event_id: EventId,
        /// Posted transaction.
        reference: TransactionRef,
        /// Business transaction type.
        transaction_type: String,
        /// Business group.
        group: String,
        /// Debit account of the principal entry.
        sender_account: String,
        /// Credit account of the principal entry.
        recipient_account: String,
        /// Principal amount.
        amount: Money,
        /// `merchant_id` from the transaction metadata, if set.
        merchant_id: Option<String>,
        /// Whether the transaction is pending.
        pending: bool,
        /// When the posting finished.
        occurred_at: DateTime<Utc>,
    },
    /// A transaction was reversed.
    TransactionReversed {
        /// Event id.
        event_id: EventId,
        /// Transaction that was reversed.
        original: TransactionRef,
        /// Reversal transaction.
        reversal: TransactionRef,
        /// When the reversal finished.
        occurred_at: DateTime<Utc>,
    },
}

impl LedgerEvent {
    /// Reference of the transaction that produced the event.
    #[must_use]
    pub fn reference(&self) -> TransactionRef {
        match self {
            Self::TransactionCompleted { reference, .. } => *reference,
            Self::TransactionReversed { reversal, .. } => *reversal,
        }
    }
}

/// Publishing failure.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The transport rejected or lost the event.
    #[error("Event transport failed: {0}")]
    Transport(String),
}

/// Outbound event port.
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    fn publish(&self, event: &LedgerEvent) -> Result<(), PublishError>;
}

/// In-process fan-out to channel subscribers.
#[derive(Debug, Default)]
pub struct InMemoryEventBus {
    subscribers: Mutex<Vec<mpsc::Sender<LedgerEvent>>>,
}

impl InMemoryEventBus {
    /// Creates a bus without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber; it receives every event published afterwards.
    pub fn subscribe(&self) -> mpsc::Receiver<LedgerEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

impl EventPublisher for InMemoryEventBus {
    fn publish(&self, event: &LedgerEvent) -> Result<(), PublishError> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        // Dead subscribers are dropped while publishing.
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        Ok(())
    }
}
