use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use super::consts::{GENESIS_HASH, GENESIS_PREVIOUS_HASH};
use super::crypto::hash_value;
use super::transaction::Transaction;

/// Errors that can occur while building blocks
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Genesis hash mismatch: expected {expected}, computed {computed}")]
    GenesisMismatch { expected: String, computed: String },
}

/// Represents a block in the blockchain
///
/// A block's hash is fixed when the block is built and the block is never
/// edited afterwards. Blocks received from peers keep the hash they arrived
/// with so that validation can compare it against a recomputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Position of the block in the chain
    index: u64,

    /// Hash of the previous block
    previous_hash: String,

    /// Ordered transactions, the coinbase first
    transactions: Vec<Transaction>,

    /// Proof of work
    nonce: u64,

    /// Seconds since the Unix epoch when the block was created
    timestamp: f64,

    /// Hash of the other five fields
    hash: String,
}

impl Block {
    /// Creates a new block and computes its hash
    ///
    /// # Arguments
    ///
    /// * `index` - Position of the block in the chain
    /// * `previous_hash` - Hash of the block this one extends
    /// * `transactions` - The transactions in the block, reward first
    /// * `nonce` - The proof-of-work counter
    /// * `timestamp` - Creation time in seconds since the Unix epoch
    ///
    /// # Returns
    ///
    /// A new block whose hash covers every other field
    pub fn new(
        index: u64,
        previous_hash: impl Into<String>,
        transactions: Vec<Transaction>,
        nonce: u64,
        timestamp: f64,
    ) -> Self {
        let previous_hash = previous_hash.into();
        let hash = hash_value(&hash_input(
            index,
            &previous_hash,
            &transactions,
            nonce,
            timestamp,
        ));

        Block {
            index,
            previous_hash,
            transactions,
            nonce,
            timestamp,
            hash,
        }
    }

    /// Rebuilds a block with a hash that was computed elsewhere
    pub fn with_hash(
        index: u64,
        previous_hash: impl Into<String>,
        transactions: Vec<Transaction>,
        nonce: u64,
        timestamp: f64,
        hash: impl Into<String>,
    ) -> Self {
        Block {
            index,
            previous_hash: previous_hash.into(),
            transactions,
            nonce,
            timestamp,
            hash: hash.into(),
        }
    }

    /// Builds the genesis block and checks it against the pinned hash
    ///
    /// A mismatch means this build hashes blocks differently from every other
    /// node, so nothing it produced could ever be accepted.
    pub fn genesis() -> Result<Self, BlockError> {
        let block = Block::new(0, GENESIS_PREVIOUS_HASH, Vec::new(), 0, 0.0);

        if block.hash != GENESIS_HASH {
            return Err(BlockError::GenesisMismatch {
                expected: GENESIS_HASH.to_string(),
                computed: block.hash,
            });
        }

        Ok(block)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Recomputes the hash from the block's fields
    pub fn calculate_hash(&self) -> String {
        hash_value(&hash_input(
            self.index,
            &self.previous_hash,
            &self.transactions,
            self.nonce,
            self.timestamp,
        ))
    }

    /// Checks whether the stored hash starts with `prefix`
    pub fn is_valid_pow(&self, prefix: &str) -> bool {
        self.hash.starts_with(prefix)
    }

    /// Checks every field against the fixed genesis block
    pub fn is_genesis(&self) -> bool {
        self.index == 0
            && self.previous_hash == GENESIS_PREVIOUS_HASH
            && self.hash == GENESIS_HASH
            && self.timestamp == 0.0
            && self.nonce == 0
            && self.transactions.is_empty()
    }
}

/// The mapping a block hash is computed over
pub(crate) fn hash_input(
    index: u64,
    previous_hash: &str,
    transactions: &[Transaction],
    nonce: u64,
    timestamp: f64,
) -> Value {
    let transactions: Vec<Value> = transactions.iter().map(Transaction::to_value).collect();

    json!({
        "index": index,
        "previous_hash": previous_hash,
        "transactions": transactions,
        "nonce": nonce,
        "timestamp": timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::consts::DIFFICULTY_PREFIX;

    fn sample_block() -> Block {
        let transactions = vec![
            Transaction::from_parts("tx-1", "coinbase", "alice", 50.0, 1700000000.5).unwrap(),
            Transaction::from_parts("tx-2", "alice", "jo\u{e3}o", 12.25, 1700000001.125).unwrap(),
        ];
        Block::new(1, GENESIS_HASH, transactions, 42, 1700000000.5)
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis().unwrap();

        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.previous_hash(), GENESIS_PREVIOUS_HASH);
        assert_eq!(genesis.hash(), GENESIS_HASH);
        assert_eq!(genesis.calculate_hash(), GENESIS_HASH);
        assert!(genesis.transactions().is_empty());
        assert!(genesis.is_genesis());
    }

    #[test]
    fn test_calculate_hash() {
        let block = sample_block();

        assert_eq!(
            block.hash(),
            "c0805f35df6f05c5b23eb0f759791e2c4ba45ac3d8f51aa0f6f7be45423dd1cb"
        );
        assert_eq!(block.calculate_hash(), block.hash());
        assert_eq!(block.hash().len(), 64);
    }

    #[test]
    fn test_hash_covers_every_field() {
        let block = sample_block();
        let transactions = block.transactions().to_vec();

        let variants = [
            Block::new(2, GENESIS_HASH, transactions.clone(), 42, 1700000000.5),
            Block::new(1, GENESIS_PREVIOUS_HASH, transactions.clone(), 42, 1700000000.5),
            Block::new(1, GENESIS_HASH, transactions[..1].to_vec(), 42, 1700000000.5),
            Block::new(1, GENESIS_HASH, transactions.clone(), 43, 1700000000.5),
            Block::new(1, GENESIS_HASH, transactions, 42, 1700000000.25),
        ];

        for variant in &variants {
            assert_ne!(variant.hash(), block.hash());
        }
    }

    #[test]
    fn test_is_valid_pow() {
        let block = Block::with_hash(1, GENESIS_HASH, Vec::new(), 0, 1.0, "000abc");
        assert!(block.is_valid_pow(DIFFICULTY_PREFIX));

        let block = Block::with_hash(1, GENESIS_HASH, Vec::new(), 0, 1.0, "00abcd");
        assert!(!block.is_valid_pow(DIFFICULTY_PREFIX));
    }

    #[test]
    fn test_round_trip_keeps_fields_and_hash() {
        let block = sample_block();

        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["previous_hash"], GENESIS_HASH);
        assert_eq!(value["transactions"][1]["destino"], "jo\u{e3}o");

        let decoded: Block = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.index(), block.index());
        assert_eq!(decoded.previous_hash(), block.previous_hash());
        assert_eq!(decoded.transactions(), block.transactions());
        assert_eq!(decoded.nonce(), block.nonce());
        assert_eq!(decoded.timestamp(), block.timestamp());
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded.calculate_hash(), block.hash());
    }

    #[test]
    fn test_decoded_hash_is_not_recomputed() {
        let mut value = serde_json::to_value(sample_block()).unwrap();
        value["hash"] = json!("forged");

        let decoded: Block = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.hash(), "forged");
        assert_ne!(decoded.calculate_hash(), "forged");
    }
}
