// Blockchain module
//
// This module contains the ledger core:
// - Transaction and Block structures
// - Canonical encoding and hashing
// - The Blockchain (chain + pending pool, validation, fork choice)
// - Proof of work mining

pub mod account;
pub mod block;
pub mod chain;
pub mod consts;
pub mod crypto;
pub mod mining;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, BlockError};
pub use chain::{Blockchain, BlockchainError, LedgerSnapshot};
pub use mining::{Miner, MiningTemplate};
pub use transaction::{Transaction, TransactionError};
