use dashmap::DashSet;
use log::{debug, error, info, warn};
use thiserror::Error;

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use super::protocol::{read_message, write_message, Message, MessageType, Payload, ProtocolError};
use crate::blockchain::{Block, Blockchain, BlockchainError, Miner, Transaction};
use crate::config::NodeConfig;

/// How long `stop` waits when poking its own listener awake
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors that can occur while running a node
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Blockchain error: {0}")]
    BlockchainError(#[from] BlockchainError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid peer address: {0}")]
    InvalidPeerAddress(String),

    #[error("Node already started")]
    AlreadyStarted,
}

/// A networked participant: owns one ledger and one miner, listens for
/// peers and gossips what it accepts
///
/// Clones share all state. Every ledger access goes through one mutex, so
/// connection handlers, gossip and local commands never interleave inside
/// a ledger operation.
#[derive(Debug, Clone)]
pub struct Node {
    /// `host:port` this node advertises as its `sender`
    address: String,

    local_addr: SocketAddr,

    blockchain: Arc<Mutex<Blockchain>>,

    miner: Miner,

    peers: Arc<DashSet<String>>,

    bootstrap: Vec<String>,

    /// Taken by the accept loop once the node starts
    listener: Arc<Mutex<Option<TcpListener>>>,

    running: Arc<AtomicBool>,

    network_timeout: Duration,
}

impl Node {
    /// Creates a node and binds its listening socket
    ///
    /// Fails if the genesis block cannot be reproduced or the address cannot
    /// be bound. With port 0 the node advertises the port it was given.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let blockchain = Blockchain::new()?;

        let listener = TcpListener::bind((config.host.as_str(), config.port))?;
        let local_addr = listener.local_addr()?;
        let address = format!("{}:{}", config.host, local_addr.port());

        let miner = Miner::new(
            config
                .miner_address
                .unwrap_or_else(|| address.clone()),
        );

        Ok(Node {
            address,
            local_addr,
            blockchain: Arc::new(Mutex::new(blockchain)),
            miner,
            peers: Arc::new(DashSet::new()),
            bootstrap: config.bootstrap,
            listener: Arc::new(Mutex::new(Some(listener))),
            running: Arc::new(AtomicBool::new(false)),
            network_timeout: config.network_timeout,
        })
    }

    /// Starts accepting connections on a background thread
    pub fn start(&self) -> Result<(), NodeError> {
        let listener = lock(&self.listener)
            .take()
            .ok_or(NodeError::AlreadyStarted)?;

        self.running.store(true, Ordering::SeqCst);

        let node = self.clone();
        thread::Builder::new()
            .name(format!("accept-{}", self.address))
            .spawn(move || node.accept_loop(listener))?;

        info!("Node started at {}", self.address);
        Ok(())
    }

    /// Closes the listening socket and interrupts any running mining
    ///
    /// Connection handlers and gossip sends already in flight are left to finish.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.miner.stop();

        // a node that never started still holds its listener
        drop(lock(&self.listener).take());

        if was_running {
            if let Err(err) = TcpStream::connect_timeout(&self.wake_address(), WAKE_TIMEOUT) {
                debug!("Could not wake accept loop of {}: {}", self.address, err);
            }
        }

        info!("Node {} stopped", self.address);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn miner_address(&self) -> &str {
        self.miner.address()
    }

    /// Copy of the current chain
    pub fn chain(&self) -> Vec<Block> {
        self.ledger().chain().to_vec()
    }

    pub fn chain_len(&self) -> usize {
        self.ledger().chain().len()
    }

    /// Copy of the current pending pool
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.ledger().pending_transactions().to_vec()
    }

    /// Balance of `address` including pending transactions
    pub fn balance(&self, address: &str) -> f64 {
        self.ledger().get_balance(address)
    }

    /// Known peers, sorted
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers.iter().map(|peer| peer.key().clone()).collect();
        peers.sort();
        peers
    }

    fn ledger(&self) -> MutexGuard<'_, Blockchain> {
        lock(&self.blockchain)
    }

    fn accept_loop(self, listener: TcpListener) {
        for stream in listener.incoming() {
            if !self.is_running() {
                break;
            }

            match stream {
                Ok(stream) => {
                    let node = self.clone();
                    thread::spawn(move || node.handle_connection(stream));
                }
                Err(err) => error!("Failed to accept connection: {}", err),
            }
        }

        debug!("Accept loop of {} finished", self.address);
    }

    /// One request, at most one response, then the connection closes
    fn handle_connection(&self, mut stream: TcpStream) {
        let message = match read_message(&mut stream) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(err) => {
                error!("Failed to read message: {}", err);
                return;
            }
        };

        if let Some(mut response) = self.process_message(message) {
            response.sender = self.address.clone();
            if let Err(err) = write_message(&mut stream, &response) {
                error!("Failed to send {} response: {}", response.kind, err);
            }
        }
    }

    /// Applies an inbound message to this node and returns the reply, if
    /// the message kind has one
    pub fn process_message(&self, message: Message) -> Option<Message> {
        info!("Message {} from {:?}", message.kind, message.sender);

        if !message.sender.is_empty()
            && message.sender != self.address
            && self.peers.insert(message.sender.clone())
        {
            info!("New peer {}", message.sender);
        }

        let payload = match message.decode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Dropping {} from {:?}: {}", message.kind, message.sender, err);
                return None;
            }
        };

        match payload {
            Payload::NewTransaction(transaction) => {
                let announcement = Message::new_transaction(&transaction);
                let id = transaction.id().to_string();

                let accepted = self.ledger().add_transaction(transaction);
                if accepted {
                    info!("Transaction {} added", id);
                    self.gossip(&announcement, Some(message.sender.as_str()));
                }
                None
            }
            Payload::NewBlock(block) => {
                let announcement = Message::new_block(&block);
                let index = block.index();

                let accepted = self.ledger().add_block(block);
                if accepted {
                    info!("Block #{} added", index);
                    self.miner.stop();
                    self.gossip(&announcement, Some(message.sender.as_str()));
                }
                None
            }
            Payload::RequestChain => {
                let snapshot = self.ledger().snapshot();
                Some(Message::response_chain(&snapshot))
            }
            Payload::ResponseChain(snapshot) => {
                let mut ledger = self.ledger();
                if ledger.replace_chain(snapshot.chain) {
                    ledger.replace_pending_transactions(snapshot.pending_transactions);
                    info!("Blockchain updated ({} blocks)", ledger.chain().len());
                }
                None
            }
        }
    }

    /// Sends `message` to every known peer except `exclude`, one thread per
    /// peer, without waiting for delivery
    fn gossip(&self, message: &Message, exclude: Option<&str>) {
        for peer in self.peers() {
            if exclude == Some(peer.as_str()) {
                continue;
            }

            let node = self.clone();
            let message = message.clone();
            thread::spawn(move || {
                if let Err(err) = node.send_message(&peer, message, false) {
                    error!("Failed to send to {}: {}", peer, err);
                }
            });
        }
    }

    fn send_message(
        &self,
        peer: &str,
        mut message: Message,
        expect_response: bool,
    ) -> Result<Option<Message>, NodeError> {
        let mut stream = self.connect(peer)?;
        stream.set_read_timeout(Some(self.network_timeout))?;
        stream.set_write_timeout(Some(self.network_timeout))?;

        message.sender = self.address.clone();
        write_message(&mut stream, &message)?;

        if !expect_response {
            return Ok(None);
        }
        Ok(read_message(&mut stream)?)
    }

    fn connect(&self, peer: &str) -> Result<TcpStream, NodeError> {
        let mut last_err = None;

        for addr in peer.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.network_timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }

        Err(match last_err {
            Some(err) => err.into(),
            None => NodeError::InvalidPeerAddress(peer.to_string()),
        })
    }

    /// Sends a chain request and waits for the answer
    fn request_chain(&self, peer: &str) -> Option<Message> {
        match self.send_message(peer, Message::request_chain(), true) {
            Ok(Some(response)) if response.kind == MessageType::ResponseChain => Some(response),
            Ok(Some(response)) => {
                warn!("Unexpected {} from {} to a chain request", response.kind, peer);
                None
            }
            Ok(None) => {
                warn!("No answer from {}", peer);
                None
            }
            Err(err) => {
                error!("Failed to request chain from {}: {}", peer, err);
                None
            }
        }
    }

    /// Asks `peer` for its ledger; on an answer the peer becomes known and
    /// the answer is applied like any inbound `RESPONSE_CHAIN`
    pub fn connect_to_peer(&self, peer: &str) -> bool {
        if peer == self.address {
            warn!("Refusing to connect to self");
            return false;
        }

        match self.request_chain(peer) {
            Some(response) => {
                self.peers.insert(peer.to_string());
                info!("Connected to peer {}", peer);
                self.process_message(response);
                true
            }
            None => false,
        }
    }

    /// Connects to every bootstrap peer, then syncs if any peer is known
    ///
    /// Returns the bootstrap peers that answered.
    pub fn connect_bootstrap_peers(&self) -> Vec<String> {
        let connected: Vec<String> = self
            .bootstrap
            .iter()
            .filter(|peer| self.connect_to_peer(peer))
            .cloned()
            .collect();

        if !self.peers.is_empty() {
            self.sync_blockchain();
        }

        connected
    }

    /// Requests the ledger of every known peer in turn and applies each answer
    pub fn sync_blockchain(&self) {
        for peer in self.peers() {
            if let Some(response) = self.request_chain(&peer) {
                self.process_message(response);
            }
        }
        info!("Sync finished with {} blocks", self.chain_len());
    }

    /// Adds a locally created transaction and gossips it to every peer
    pub fn broadcast_transaction(&self, transaction: Transaction) -> bool {
        let announcement = Message::new_transaction(&transaction);

        let accepted = self.ledger().add_transaction(transaction);
        if accepted {
            self.gossip(&announcement, None);
        }
        accepted
    }

    /// Adds a block through the same checks as a peer's and gossips it
    pub fn broadcast_block(&self, block: Block) -> bool {
        let announcement = Message::new_block(&block);

        let accepted = self.ledger().add_block(block);
        if accepted {
            self.gossip(&announcement, None);
        }
        accepted
    }

    /// Mines the pending pool into a block, then adds and gossips it
    pub fn mine(&self) -> Option<Block> {
        self.mine_with_progress(None)
    }

    /// Like [`Node::mine`], reporting the nonce every 10,000 attempts
    ///
    /// The ledger stays unlocked during the search so peers can still be
    /// served. Returns `None` if mining was stopped or the block went stale
    /// before it could be added.
    pub fn mine_with_progress(&self, on_progress: Option<&dyn Fn(u64)>) -> Option<Block> {
        info!("Mining started");
        let template = self.miner.template(&self.ledger(), None);

        let Some(block) = self.miner.mine(template, on_progress) else {
            info!("Mining stopped");
            return None;
        };

        info!("Mined block #{} ({})", block.index(), block.hash());
        if self.broadcast_block(block.clone()) {
            Some(block)
        } else {
            warn!("Mined block #{} was rejected by the local chain", block.index());
            None
        }
    }

    /// Interrupts a running [`Node::mine`]
    pub fn stop_mining(&self) {
        self.miner.stop();
    }

    fn wake_address(&self) -> SocketAddr {
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        addr
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
