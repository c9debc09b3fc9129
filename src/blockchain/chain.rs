use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::HashSet;

use super::account::{AccountError, BalanceSheet};
use super::block::{Block, BlockError};
use super::consts::{COINBASE_REWARD, DIFFICULTY_PREFIX, GENESIS_SENDER};
use super::transaction::Transaction;

/// Errors that can occur during blockchain operations
///
/// Only construction failures leave this module; rejection reasons are
/// logged and callers see a plain `false`.
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Account error: {0}")]
    AccountError(#[from] AccountError),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),
}

/// Full ledger state as exchanged between nodes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub chain: Vec<Block>,

    #[serde(default)]
    pub pending_transactions: Vec<Transaction>,
}

/// Represents the blockchain: the accepted blocks plus the pending pool
///
/// Balances are never stored. Every query replays the transactions that
/// lead up to it.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, starting with genesis
    chain: Vec<Block>,

    /// Accepted transactions waiting to be included in a block, in arrival order
    pending_transactions: Vec<Transaction>,
}

impl Blockchain {
    /// Creates a new blockchain holding only the genesis block
    ///
    /// # Returns
    ///
    /// A blockchain with an empty pending pool, or `BlockError::GenesisMismatch`
    /// if this build cannot reproduce the pinned genesis hash
    pub fn new() -> Result<Self, BlockchainError> {
        Ok(Blockchain {
            chain: vec![Block::genesis()?],
            pending_transactions: Vec::new(),
        })
    }

    /// Rebuilds a blockchain from a snapshot without validating it
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, BlockchainError> {
        if snapshot.chain.is_empty() {
            return Err(BlockchainError::InvalidChain(
                "snapshot holds no blocks".to_string(),
            ));
        }

        Ok(Blockchain {
            chain: snapshot.chain,
            pending_transactions: snapshot.pending_transactions,
        })
    }

    /// Copies the chain and pending pool into their wire form
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            chain: self.chain.clone(),
            pending_transactions: self.pending_transactions.clone(),
        }
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending_transactions
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> &Block {
        self.chain
            .last()
            .expect("a blockchain always holds at least the genesis block")
    }

    /// Balance of `address` over the chain followed by the pending pool
    pub fn get_balance(&self, address: &str) -> f64 {
        let mut balance = 0.0;
        let confirmed = self.chain.iter().flat_map(|block| block.transactions());

        for transaction in confirmed.chain(self.pending_transactions.iter()) {
            if transaction.recipient() == address {
                balance += transaction.amount();
            }
            if transaction.sender() == address {
                balance -= transaction.amount();
            }
        }

        balance
    }

    /// Adds a transaction to the pending pool
    ///
    /// # Arguments
    ///
    /// * `transaction` - The transaction to admit
    ///
    /// # Returns
    ///
    /// `false` if the transaction is a duplicate, claims to be a mining
    /// reward, or spends more than its sender holds
    pub fn add_transaction(&mut self, transaction: Transaction) -> bool {
        match self.validate_transaction(&transaction) {
            Ok(()) => {
                self.pending_transactions.push(transaction);
                true
            }
            Err(err) => {
                debug!("Rejected transaction {}: {}", transaction.id(), err);
                false
            }
        }
    }

    fn validate_transaction(&self, transaction: &Transaction) -> Result<(), BlockchainError> {
        if self.contains_transaction(transaction.id()) {
            return Err(BlockchainError::InvalidTransaction(format!(
                "duplicate id {}",
                transaction.id()
            )));
        }

        if transaction.is_coinbase() {
            return Err(BlockchainError::InvalidTransaction(
                "reward transactions cannot be submitted".to_string(),
            ));
        }

        if transaction.sender() != GENESIS_SENDER {
            let available = self.get_balance(transaction.sender());
            if available < transaction.amount() {
                return Err(AccountError::InsufficientFunds {
                    address: transaction.sender().to_string(),
                    required: transaction.amount(),
                    available,
                }
                .into());
            }
        }

        Ok(())
    }

    fn contains_transaction(&self, id: &str) -> bool {
        self.pending_transactions.iter().any(|tx| tx.id() == id)
            || self
                .chain
                .iter()
                .flat_map(|block| block.transactions())
                .any(|tx| tx.id() == id)
    }

    /// Appends a block that extends the current chain
    ///
    /// Pending transactions included in the block leave the pool.
    ///
    /// # Arguments
    ///
    /// * `block` - A block whose index and previous hash point at the current tip
    ///
    /// # Returns
    ///
    /// `false` if the block fails a structural, proof-of-work or balance check
    pub fn add_block(&mut self, block: Block) -> bool {
        if let Err(err) = self.validate_block(&block) {
            debug!("Rejected block #{}: {}", block.index(), err);
            return false;
        }

        {
            let included: HashSet<&str> =
                block.transactions().iter().map(Transaction::id).collect();
            self.pending_transactions
                .retain(|tx| !included.contains(tx.id()));
        }
        self.chain.push(block);

        true
    }

    /// Checks whether `block` could be appended to the current chain
    pub fn is_valid_block(&self, block: &Block) -> bool {
        self.validate_block(block).is_ok()
    }

    fn validate_block(&self, block: &Block) -> Result<(), BlockchainError> {
        let balances = BalanceSheet::replay(self.chain.iter().flat_map(|b| b.transactions()));
        validate_successor(block, self.last_block(), self.chain.len() as u64, balances)
    }

    /// Checks a whole chain, from the fixed genesis block onwards
    ///
    /// Each block is checked against the candidate's own preceding blocks.
    pub fn is_valid_chain(chain: &[Block]) -> bool {
        match validate_chain(chain) {
            Ok(()) => true,
            Err(err) => {
                debug!("Rejected chain of {} blocks: {}", chain.len(), err);
                false
            }
        }
    }

    /// Adopts `candidate` if it is strictly longer than the current chain and valid
    ///
    /// The pending pool is left alone.
    ///
    /// # Arguments
    ///
    /// * `candidate` - A full chain starting at genesis, usually from a peer
    ///
    /// # Returns
    ///
    /// Whether the candidate replaced the current chain
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> bool {
        if candidate.len() <= self.chain.len() {
            debug!(
                "Ignoring chain of {} blocks, ours has {}",
                candidate.len(),
                self.chain.len()
            );
            return false;
        }

        if !Self::is_valid_chain(&candidate) {
            return false;
        }

        self.chain = candidate;
        true
    }

    /// Replaces the whole pending pool
    pub fn replace_pending_transactions(&mut self, pending: Vec<Transaction>) {
        self.pending_transactions = pending;
    }
}

fn validate_chain(chain: &[Block]) -> Result<(), BlockchainError> {
    let genesis = chain
        .first()
        .ok_or_else(|| BlockchainError::InvalidChain("chain is empty".to_string()))?;

    if !genesis.is_genesis() {
        return Err(BlockchainError::InvalidChain(
            "first block is not the genesis block".to_string(),
        ));
    }

    let mut balances = BalanceSheet::new();
    for (position, pair) in chain.windows(2).enumerate() {
        let (previous, current) = (&pair[0], &pair[1]);
        validate_successor(current, previous, position as u64 + 1, balances.clone())?;
        balances.apply_all(current.transactions());
    }

    Ok(())
}

/// Structural, proof-of-work and transaction checks for a block that should
/// sit at `expected_index` right after `previous`
fn validate_successor(
    block: &Block,
    previous: &Block,
    expected_index: u64,
    balances: BalanceSheet,
) -> Result<(), BlockchainError> {
    if block.index() != expected_index {
        return Err(BlockchainError::InvalidBlock(format!(
            "index {} where {} was expected",
            block.index(),
            expected_index
        )));
    }

    if block.previous_hash() != previous.hash() {
        return Err(BlockchainError::InvalidBlock(
            "previous hash does not match".to_string(),
        ));
    }

    if block.hash() != block.calculate_hash() {
        return Err(BlockchainError::InvalidBlock(
            "hash does not match contents".to_string(),
        ));
    }

    if !block.is_valid_pow(DIFFICULTY_PREFIX) {
        return Err(BlockchainError::InvalidBlock(format!(
            "hash does not start with {}",
            DIFFICULTY_PREFIX
        )));
    }

    validate_block_transactions(block, balances)
}

/// The first transaction must be the block's reward; every other one must be
/// covered by its sender's running balance.
fn validate_block_transactions(
    block: &Block,
    mut balances: BalanceSheet,
) -> Result<(), BlockchainError> {
    let (reward, transfers) = block
        .transactions()
        .split_first()
        .ok_or_else(|| BlockchainError::InvalidBlock("block has no transactions".to_string()))?;

    if !reward.is_coinbase() {
        return Err(BlockchainError::InvalidBlock(
            "first transaction is not a reward".to_string(),
        ));
    }
    if reward.amount() != COINBASE_REWARD {
        return Err(BlockchainError::InvalidBlock(format!(
            "reward of {} instead of {}",
            reward.amount(),
            COINBASE_REWARD
        )));
    }
    if reward.timestamp() != block.timestamp() {
        return Err(BlockchainError::InvalidBlock(
            "reward timestamp differs from block timestamp".to_string(),
        ));
    }

    balances.credit(reward.recipient(), reward.amount());

    for transaction in transfers {
        if transaction.is_coinbase() {
            return Err(BlockchainError::InvalidBlock(format!(
                "extra reward transaction {}",
                transaction.id()
            )));
        }
        balances.transfer(transaction)?;
    }

    Ok(())
}
