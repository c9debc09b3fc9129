use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use std::hash::{Hash, Hasher};

use super::consts::COINBASE_SENDER;

/// Errors that can occur while constructing a transaction
#[derive(Debug, Error, PartialEq)]
pub enum TransactionError {
    #[error("Invalid sender address: must not be empty")]
    EmptySender,

    #[error("Invalid recipient address: must not be empty")]
    EmptyRecipient,

    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(f64),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(f64),
}

/// A transfer of value between two account identifiers
///
/// Transactions are immutable once built. Two transactions are the same
/// transaction exactly when their ids match, whatever their other fields say.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "TransactionData")]
pub struct Transaction {
    id: String,

    #[serde(rename = "origem")]
    sender: String,

    #[serde(rename = "destino")]
    recipient: String,

    #[serde(rename = "valor")]
    amount: f64,

    timestamp: f64,
}

/// Unchecked wire form, validated on its way into a [`Transaction`]
#[derive(Deserialize)]
struct TransactionData {
    id: String,
    origem: String,
    destino: String,
    valor: f64,
    timestamp: f64,
}

impl TryFrom<TransactionData> for Transaction {
    type Error = TransactionError;

    fn try_from(data: TransactionData) -> Result<Self, Self::Error> {
        Transaction::from_parts(data.id, data.origem, data.destino, data.valor, data.timestamp)
    }
}

impl Transaction {
    /// Creates a new transaction with a fresh id, stamped with the current time
    ///
    /// # Arguments
    ///
    /// * `sender` - The account the amount is taken from
    /// * `recipient` - The account the amount goes to
    /// * `amount` - The amount to transfer, finite and positive
    ///
    /// # Returns
    ///
    /// The transaction, or a `TransactionError` naming the first invalid field
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: f64,
    ) -> Result<Self, TransactionError> {
        Self::from_parts(
            Uuid::new_v4().to_string(),
            sender,
            recipient,
            amount,
            current_timestamp(),
        )
    }

    /// Creates the reward transaction that opens a block
    ///
    /// The timestamp must be the block's own timestamp.
    pub fn new_coinbase(
        recipient: impl Into<String>,
        amount: f64,
        timestamp: f64,
    ) -> Result<Self, TransactionError> {
        Self::from_parts(
            Uuid::new_v4().to_string(),
            COINBASE_SENDER,
            recipient,
            amount,
            timestamp,
        )
    }

    /// Rebuilds a transaction from every one of its fields
    pub fn from_parts(
        id: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: f64,
        timestamp: f64,
    ) -> Result<Self, TransactionError> {
        let sender = sender.into();
        let recipient = recipient.into();

        if sender.is_empty() {
            return Err(TransactionError::EmptySender);
        }
        if recipient.is_empty() {
            return Err(TransactionError::EmptyRecipient);
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(TransactionError::InvalidAmount(amount));
        }
        if !timestamp.is_finite() {
            return Err(TransactionError::InvalidTimestamp(timestamp));
        }

        Ok(Transaction {
            id: id.into(),
            sender,
            recipient,
            amount,
            timestamp,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Checks if the transaction claims to be a mining reward
    pub fn is_coinbase(&self) -> bool {
        self.sender == COINBASE_SENDER
    }

    /// The mapping this transaction contributes to a block hash
    pub fn to_value(&self) -> Value {
        json!({
            "id": self.id,
            "origem": self.sender,
            "destino": self.recipient,
            "valor": self.amount,
            "timestamp": self.timestamp,
        })
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Seconds since the Unix epoch, with microsecond resolution
pub fn current_timestamp() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
