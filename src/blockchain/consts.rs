/// Every block hash must start with this prefix to satisfy proof-of-work
pub const DIFFICULTY_PREFIX: &str = "000";

/// Sender identifier of the reward transaction that opens every block
pub const COINBASE_SENDER: &str = "coinbase";

/// Sender identifier exempt from the pending-pool balance check
pub const GENESIS_SENDER: &str = "genesis";

/// Amount credited to the miner of each block
pub const COINBASE_REWARD: f64 = 50.0;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash of the genesis block under the canonical encoding
pub const GENESIS_HASH: &str =
    "09d9be8e537c5eb3ac4e5f7e7b7c8a0780362c87153005309b349171c9172570";

/// The miner reports progress every this many nonces
pub const PROGRESS_INTERVAL: u64 = 10_000;
