use clap::Parser;

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::time::Instant;

use crate::blockchain::consts::{COINBASE_SENDER, GENESIS_SENDER};
use crate::blockchain::Transaction;
use crate::config::{NodeConfig, DEFAULT_HOST, DEFAULT_PORT};
use crate::network::Node;

/// Command line arguments of the node binary
#[derive(Debug, Parser)]
#[command(name = "lsdchain")]
#[command(about = "Proof-of-work ledger node", version, long_about = None)]
pub struct Args {
    /// Host to listen on
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Peers to connect to at startup (e.g. localhost:5001)
    #[arg(long, num_args = 0..)]
    pub bootstrap: Vec<String>,

    /// Account credited with mining rewards; defaults to the node address
    #[arg(long)]
    pub miner_address: Option<String>,
}

impl Args {
    pub fn into_config(self) -> NodeConfig {
        let mut config = NodeConfig::new(self.host, self.port).with_bootstrap(self.bootstrap);
        if let Some(miner_address) = self.miner_address {
            config = config.with_miner_address(miner_address);
        }
        config
    }
}

const RULE_WIDTH: usize = 60;

/// Interactive text menu driving one node
pub struct Menu<'a, R, W> {
    node: &'a Node,
    input: R,
    output: W,
}

impl<'a, R: BufRead, W: Write> Menu<'a, R, W> {
    pub fn new(node: &'a Node, input: R, output: W) -> Self {
        Menu { node, input, output }
    }

    /// Runs until the user picks exit or input ends
    pub fn run(&mut self) -> io::Result<()> {
        loop {
            self.print_menu()?;
            let Some(choice) = self.prompt("Choice: ")? else {
                writeln!(self.output)?;
                return Ok(());
            };

            match choice.as_str() {
                "1" => self.create_transaction()?,
                "2" => self.show_pending()?,
                "3" => self.mine_block()?,
                "4" => self.show_chain()?,
                "5" => self.show_balance()?,
                "6" => self.show_peers()?,
                "7" => self.connect_peer()?,
                "8" => self.sync_chain()?,
                "0" => {
                    writeln!(self.output, "Shutting down...")?;
                    return Ok(());
                }
                _ => writeln!(self.output, "Invalid option.")?,
            }
        }
    }

    /// Prints `label` and reads one trimmed line; `None` once input ends
    fn prompt(&mut self, label: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", label)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn print_menu(&mut self) -> io::Result<()> {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(self.output, "\n{}", rule)?;
        writeln!(self.output, "LSDCHAIN - {}", self.node.address())?;
        writeln!(self.output, "{}", rule)?;
        writeln!(self.output, "1. Create transaction")?;
        writeln!(self.output, "2. Show pending transactions")?;
        writeln!(self.output, "3. Mine block")?;
        writeln!(self.output, "4. Show blockchain")?;
        writeln!(self.output, "5. Show balance")?;
        writeln!(self.output, "6. Show peers")?;
        writeln!(self.output, "7. Connect to peer")?;
        writeln!(self.output, "8. Sync blockchain")?;
        writeln!(self.output, "0. Exit")?;
        writeln!(self.output, "{}", rule)
    }

    fn create_transaction(&mut self) -> io::Result<()> {
        writeln!(self.output, "\n--- New transaction ---")?;
        let Some(sender) = self.prompt("Sender: ")? else {
            return Ok(());
        };
        let Some(recipient) = self.prompt("Recipient: ")? else {
            return Ok(());
        };
        let Some(amount) = self.prompt("Amount: ")? else {
            return Ok(());
        };

        let amount: f64 = match amount.parse() {
            Ok(amount) => amount,
            Err(err) => return writeln!(self.output, "Error: invalid amount {:?}: {}", amount, err),
        };

        let transaction = match Transaction::new(sender.as_str(), recipient, amount) {
            Ok(transaction) => transaction,
            Err(err) => return writeln!(self.output, "Error: {}", err),
        };

        if sender != GENESIS_SENDER && sender != COINBASE_SENDER {
            let balance = self.node.balance(&sender);
            if balance < amount {
                return writeln!(self.output, "Insufficient balance: {} < {}", balance, amount);
            }
        }

        let id = short_id(transaction.id()).to_string();
        if self.node.broadcast_transaction(transaction) {
            writeln!(self.output, "Transaction created: {}...", id)
        } else {
            writeln!(self.output, "Transaction rejected (duplicate or invalid).")
        }
    }

    fn show_pending(&mut self) -> io::Result<()> {
        writeln!(self.output, "\n--- Pending transactions ---")?;
        let pending = self.node.pending_transactions();
        if pending.is_empty() {
            return writeln!(self.output, "No pending transactions.");
        }

        for tx in pending {
            writeln!(
                self.output,
                "[{}...] {} -> {}: {}",
                short_id(tx.id()),
                tx.sender(),
                tx.recipient(),
                tx.amount()
            )?;
        }
        Ok(())
    }

    fn mine_block(&mut self) -> io::Result<()> {
        let node = self.node;
        let count = node.pending_transactions().len();
        writeln!(self.output, "\nMining block with {} transaction(s) + coinbase...", count)?;
        self.output.flush()?;

        let start = Instant::now();
        let output = RefCell::new(&mut self.output);
        let progress_error = RefCell::new(None);
        let progress = |nonce: u64| {
            let mut output = output.borrow_mut();
            if let Err(err) = writeln!(output, "  nonce {}...", nonce).and_then(|()| output.flush()) {
                progress_error.borrow_mut().get_or_insert(err);
            }
        };
        let block = node.mine_with_progress(Some(&progress));
        let elapsed = start.elapsed().as_secs_f64();

        if let Some(err) = progress_error.into_inner() {
            return Err(err);
        }

        match block {
            Some(block) => {
                writeln!(self.output, "Block #{} mined in {:.2}s", block.index(), elapsed)?;
                writeln!(self.output, "Hash: {}", block.hash())?;
                writeln!(self.output, "Nonce: {}", block.nonce())
            }
            None => writeln!(self.output, "Mining stopped."),
        }
    }

    fn show_chain(&mut self) -> io::Result<()> {
        writeln!(self.output, "\n--- Blockchain ---")?;
        for block in self.node.chain() {
            writeln!(self.output, "\n[Block #{}]", block.index())?;
            writeln!(self.output, "Hash: {}", block.hash())?;
            writeln!(self.output, "Previous: {}", block.previous_hash())?;
            writeln!(self.output, "Nonce: {}", block.nonce())?;
            writeln!(self.output, "Timestamp: {}", block.timestamp())?;
            writeln!(self.output, "Transactions: {}", block.transactions().len())?;
            for tx in block.transactions() {
                writeln!(self.output, "  - {} -> {}: {}", tx.sender(), tx.recipient(), tx.amount())?;
            }
        }
        Ok(())
    }

    fn show_balance(&mut self) -> io::Result<()> {
        let Some(address) = self.prompt("\nAddress: ")? else {
            return Ok(());
        };
        let balance = self.node.balance(&address);
        writeln!(self.output, "Balance of {}: {}", address, balance)
    }

    fn show_peers(&mut self) -> io::Result<()> {
        writeln!(self.output, "\n--- Peers ---")?;
        let peers = self.node.peers();
        if peers.is_empty() {
            return writeln!(self.output, "No connected peers.");
        }

        for peer in peers {
            writeln!(self.output, "- {}", peer)?;
        }
        Ok(())
    }

    fn connect_peer(&mut self) -> io::Result<()> {
        let Some(peer) = self.prompt("\nPeer address (host:port): ")? else {
            return Ok(());
        };

        if self.node.connect_to_peer(&peer) {
            writeln!(self.output, "Connected to {}", peer)
        } else {
            writeln!(self.output, "Failed to connect to peer.")
        }
    }

    fn sync_chain(&mut self) -> io::Result<()> {
        writeln!(self.output, "\nSyncing blockchain...")?;
        self.node.sync_blockchain();
        writeln!(self.output, "Blockchain has {} blocks.", self.node.chain_len())
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
