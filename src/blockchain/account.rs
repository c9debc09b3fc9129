use thiserror::Error;

use std::collections::HashMap;

use super::transaction::Transaction;

/// Errors that can occur while applying a transfer to a balance sheet
#[derive(Debug, Error, PartialEq)]
pub enum AccountError {
    #[error("Insufficient funds for {address}: required {required}, available {available}")]
    InsufficientFunds {
        address: String,
        required: f64,
        available: f64,
    },
}

/// Running balances derived by replaying transactions
///
/// Nothing here is ever persisted; a sheet is rebuilt from the chain every
/// time a balance is needed.
#[derive(Debug, Clone, Default)]
pub struct BalanceSheet {
    balances: HashMap<String, f64>,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays every transaction unconditionally, crediting the recipient and
    /// debiting the sender
    pub fn replay<'a, I>(transactions: I) -> Self
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let mut sheet = Self::new();
        sheet.apply_all(transactions);
        sheet
    }

    /// Applies transactions without any balance check
    pub fn apply_all<'a, I>(&mut self, transactions: I)
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        for transaction in transactions {
            self.credit(transaction.recipient(), transaction.amount());
            self.debit(transaction.sender(), transaction.amount());
        }
    }

    /// Gets the balance of an address (zero if it never appeared)
    pub fn balance(&self, address: &str) -> f64 {
        self.balances.get(address).copied().unwrap_or(0.0)
    }

    pub fn credit(&mut self, address: &str, amount: f64) {
        *self.balances.entry(address.to_string()).or_insert(0.0) += amount;
    }

    fn debit(&mut self, address: &str, amount: f64) {
        *self.balances.entry(address.to_string()).or_insert(0.0) -= amount;
    }

    /// Moves funds from the sender to the recipient, refusing to overdraw the sender
    pub fn transfer(&mut self, transaction: &Transaction) -> Result<(), AccountError> {
        let available = self.balance(transaction.sender());
        if available < transaction.amount() {
            return Err(AccountError::InsufficientFunds {
                address: transaction.sender().to_string(),
                required: transaction.amount(),
                available,
            });
        }

        self.debit(transaction.sender(), transaction.amount());
        self.credit(transaction.recipient(), transaction.amount());
        Ok(())
    }
}
