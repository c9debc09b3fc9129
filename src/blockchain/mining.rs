use log::{debug, warn};
use serde_json::Value;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::block::{hash_input, Block};
use super::chain::Blockchain;
use super::consts::{COINBASE_REWARD, DIFFICULTY_PREFIX, PROGRESS_INTERVAL};
use super::crypto::hash_value;
use super::transaction::{current_timestamp, Transaction};

/// What a new block will extend and carry, captured from a ledger
#[derive(Debug, Clone)]
pub struct MiningTemplate {
    pub index: u64,
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
}

/// Proof-of-work miner paying its rewards to one address
///
/// Clones share the stop flag, so any clone can interrupt a search running
/// on another thread.
#[derive(Debug, Clone)]
pub struct Miner {
    miner_address: String,
    mining: Arc<AtomicBool>,
}

impl Miner {
    pub fn new(miner_address: impl Into<String>) -> Self {
        Miner {
            miner_address: miner_address.into(),
            mining: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn address(&self) -> &str {
        &self.miner_address
    }

    /// Snapshots the tip of `ledger` and either the given transactions or
    /// the current pending pool
    ///
    /// Arms the stop flag, so a [`Miner::stop`] issued from here on cancels
    /// the search over this template even before it starts.
    pub fn template(
        &self,
        ledger: &Blockchain,
        transactions: Option<Vec<Transaction>>,
    ) -> MiningTemplate {
        self.mining.store(true, Ordering::SeqCst);
        MiningTemplate {
            index: ledger.chain().len() as u64,
            previous_hash: ledger.last_block().hash().to_string(),
            transactions: transactions
                .unwrap_or_else(|| ledger.pending_transactions().to_vec()),
        }
    }

    /// Mines a block on top of `ledger`
    pub fn mine_block(
        &self,
        ledger: &Blockchain,
        transactions: Option<Vec<Transaction>>,
        on_progress: Option<&dyn Fn(u64)>,
    ) -> Option<Block> {
        self.mine(self.template(ledger, transactions), on_progress)
    }

    /// Searches for a nonce that gives the templated block a valid hash
    ///
    /// Returns `None` if [`Miner::stop`] was called after the template was
    /// taken and before a nonce was found.
    /// `on_progress` receives the current nonce every 10,000 attempts.
    pub fn mine(&self, template: MiningTemplate, on_progress: Option<&dyn Fn(u64)>) -> Option<Block> {
        self.search(template, DIFFICULTY_PREFIX, on_progress)
    }

    pub(crate) fn search(
        &self,
        template: MiningTemplate,
        prefix: &str,
        on_progress: Option<&dyn Fn(u64)>,
    ) -> Option<Block> {
        let timestamp = current_timestamp();
        let reward = match Transaction::new_coinbase(&self.miner_address, COINBASE_REWARD, timestamp) {
            Ok(reward) => reward,
            Err(err) => {
                warn!("Cannot build reward transaction for {:?}: {}", self.miner_address, err);
                self.mining.store(false, Ordering::SeqCst);
                return None;
            }
        };

        let mut transactions = Vec::with_capacity(template.transactions.len() + 1);
        transactions.push(reward);
        transactions.extend(template.transactions);

        let mut input = hash_input(
            template.index,
            &template.previous_hash,
            &transactions,
            0,
            timestamp,
        );
        let mut nonce: u64 = 0;

        while self.mining.load(Ordering::SeqCst) {
            input["nonce"] = Value::from(nonce);
            let hash = hash_value(&input);

            if hash.starts_with(prefix) {
                self.mining.store(false, Ordering::SeqCst);
                return Some(Block::with_hash(
                    template.index,
                    template.previous_hash,
                    transactions,
                    nonce,
                    timestamp,
                    hash,
                ));
            }

            nonce += 1;
            if nonce % PROGRESS_INTERVAL == 0 {
                if let Some(report) = on_progress {
                    report(nonce);
                }
            }
        }

        debug!("Mining of block #{} stopped at nonce {}", template.index, nonce);
        None
    }

    /// Asks a running search to give up at its next iteration
    pub fn stop(&self) {
        self.mining.store(false, Ordering::SeqCst);
    }

    pub fn is_mining(&self) -> bool {
        self.mining.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::consts::COINBASE_SENDER;

    use std::cell::Cell;

    #[test]
    fn test_mine_empty_pool() {
        let blockchain = Blockchain::new().unwrap();
        let miner = Miner::new("miner");

        let block = miner.mine_block(&blockchain, None, None).unwrap();

        assert_eq!(block.index(), 1);
        assert_eq!(block.previous_hash(), blockchain.last_block().hash());
        assert_eq!(block.transactions().len(), 1);

        let reward = &block.transactions()[0];
        assert_eq!(reward.sender(), COINBASE_SENDER);
        assert_eq!(reward.recipient(), "miner");
        assert_eq!(reward.amount(), 50.0);
        assert_eq!(reward.timestamp(), block.timestamp());
        assert!(!miner.is_mining());
    }

    #[test]
    fn test_mined_block_has_valid_pow() {
        let mut blockchain = Blockchain::new().unwrap();
        let miner = Miner::new("miner");

        for _ in 0..3 {
            let block = miner.mine_block(&blockchain, None, None).unwrap();
            assert!(block.hash().starts_with("000"));
            assert_eq!(block.hash(), block.calculate_hash());
            assert!(blockchain.add_block(block));
        }
        assert_eq!(blockchain.chain().len(), 4);
    }

    #[test]
    fn test_mine_includes_pending_after_reward() {
        let mut blockchain = Blockchain::new().unwrap();
        let tx = Transaction::new("genesis", "alice", 3.0).unwrap();
        assert!(blockchain.add_transaction(tx.clone()));

        let block = Miner::new("miner").mine_block(&blockchain, None, None).unwrap();

        assert_eq!(block.transactions().len(), 2);
        assert!(block.transactions()[0].is_coinbase());
        assert_eq!(block.transactions()[1], tx);
    }

    #[test]
    fn test_mine_explicit_transactions() {
        let mut blockchain = Blockchain::new().unwrap();
        assert!(blockchain.add_transaction(Transaction::new("genesis", "alice", 3.0).unwrap()));

        let block = Miner::new("miner")
            .mine_block(&blockchain, Some(Vec::new()), None)
            .unwrap();

        assert_eq!(block.transactions().len(), 1);
    }

    #[test]
    fn test_template_snapshot() {
        let mut blockchain = Blockchain::new().unwrap();
        let miner = Miner::new("miner");
        let template = miner.template(&blockchain, None);

        assert!(blockchain.add_transaction(Transaction::new("genesis", "alice", 3.0).unwrap()));

        assert_eq!(template.index, 1);
        assert_eq!(template.previous_hash, blockchain.last_block().hash());
        assert!(template.transactions.is_empty());
    }

    #[test]
    fn test_stop_from_progress_callback() {
        let blockchain = Blockchain::new().unwrap();
        let miner = Miner::new("miner");
        let reports = Cell::new(Vec::new());
        let stopper = miner.clone();

        let report = |nonce: u64| {
            let mut seen = reports.take();
            seen.push(nonce);
            reports.set(seen);
            stopper.stop();
        };

        // hex digests never contain 'g', so only the stop flag ends this search
        let template = miner.template(&blockchain, None);
        let block = miner.search(template, "g", Some(&report));

        assert!(block.is_none());
        assert_eq!(reports.take(), vec![10_000]);
        assert!(!miner.is_mining());
    }

    #[test]
    fn test_stop_between_template_and_search() {
        let blockchain = Blockchain::new().unwrap();
        let miner = Miner::new("miner");

        let template = miner.template(&blockchain, None);
        assert!(miner.is_mining());
        miner.stop();

        let reports = Cell::new(0);
        let report = |_nonce: u64| reports.set(reports.get() + 1);
        assert!(miner.search(template, "g", Some(&report)).is_none());
        assert_eq!(reports.get(), 0);
    }

    #[test]
    fn test_empty_miner_address_yields_nothing() {
        let blockchain = Blockchain::new().unwrap();
        let miner = Miner::new("");
        assert!(miner.mine_block(&blockchain, None, None).is_none());
        assert!(!miner.is_mining());
    }
}
