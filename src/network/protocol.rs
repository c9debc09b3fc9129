use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use std::fmt;
use std::io::{self, Read, Write};

use crate::blockchain::crypto::canonical_bytes;
use crate::blockchain::{Block, LedgerSnapshot, Transaction};

/// Errors that can occur while encoding, decoding or moving messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Message of {0} bytes does not fit in a frame")]
    FrameTooLarge(usize),

    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: MessageType,
        source: serde_json::Error,
    },
}

/// The four kinds of message peers exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Announces a newly accepted transaction
    NewTransaction,
    /// Announces a newly accepted block
    NewBlock,
    /// Asks the peer for its full ledger
    RequestChain,
    /// Carries a full ledger in answer to a request
    ResponseChain,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::NewTransaction => "NEW_TRANSACTION",
            MessageType::NewBlock => "NEW_BLOCK",
            MessageType::RequestChain => "REQUEST_CHAIN",
            MessageType::ResponseChain => "RESPONSE_CHAIN",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded contents of a message, one variant per kind
#[derive(Debug, Clone)]
pub enum Payload {
    NewTransaction(Transaction),
    NewBlock(Block),
    RequestChain,
    ResponseChain(LedgerSnapshot),
}

/// Message envelope as it travels on the wire
///
/// The payload stays raw JSON until [`Message::decode`] is called, so that a
/// malformed payload can be told apart from a malformed envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,

    pub payload: Value,

    /// `host:port` of the sending node, filled in right before sending
    #[serde(default)]
    pub sender: String,
}

impl Message {
    pub fn new(kind: MessageType, payload: Value) -> Self {
        Message {
            kind,
            payload,
            sender: String::new(),
        }
    }

    pub fn new_transaction(transaction: &Transaction) -> Self {
        Self::new(
            MessageType::NewTransaction,
            json!({ "transaction": transaction }),
        )
    }

    pub fn new_block(block: &Block) -> Self {
        Self::new(MessageType::NewBlock, json!({ "block": block }))
    }

    pub fn request_chain() -> Self {
        Self::new(MessageType::RequestChain, json!({}))
    }

    pub fn response_chain(snapshot: &LedgerSnapshot) -> Self {
        Self::new(MessageType::ResponseChain, json!({ "blockchain": snapshot }))
    }

    /// Decodes the payload according to the message kind
    pub fn decode(&self) -> Result<Payload, ProtocolError> {
        match self.kind {
            MessageType::NewTransaction => self.field("transaction").map(Payload::NewTransaction),
            MessageType::NewBlock => self.field("block").map(Payload::NewBlock),
            MessageType::RequestChain => Ok(Payload::RequestChain),
            MessageType::ResponseChain => {
                let snapshot = match self.payload.get("blockchain") {
                    Some(value) => self.parse(value.clone())?,
                    None => LedgerSnapshot::default(),
                };
                Ok(Payload::ResponseChain(snapshot))
            }
        }
    }

    fn field<T: DeserializeOwned>(&self, key: &str) -> Result<T, ProtocolError> {
        let value = self.payload.get(key).cloned().unwrap_or(Value::Null);
        self.parse(value)
    }

    fn parse<T: DeserializeOwned>(&self, value: Value) -> Result<T, ProtocolError> {
        serde_json::from_value(value).map_err(|source| ProtocolError::InvalidPayload {
            kind: self.kind,
            source,
        })
    }

    /// Encodes the message as one frame: a 4-byte big-endian length followed
    /// by the canonical JSON text
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = canonical_bytes(&serde_json::to_value(self)?);
        let length = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge(body.len()))?;

        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&length.to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Parses a frame body (without its length prefix)
    pub fn from_bytes(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(body).map_err(ProtocolError::Deserialization)
    }
}

pub fn write_message<W: Write>(stream: &mut W, message: &Message) -> Result<(), ProtocolError> {
    stream.write_all(&message.to_bytes()?)?;
    stream.flush()?;
    Ok(())
}

/// Reads one frame
///
/// Returns `Ok(None)` when the stream closes before a whole frame arrived
/// or the frame is empty.
pub fn read_message<R: Read>(stream: &mut R) -> Result<Option<Message>, ProtocolError> {
    let mut length_buf = [0u8; 4];
    match stream.read_exact(&mut length_buf) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let length = u32::from_be_bytes(length_buf) as usize;
    if length == 0 {
        return Ok(None);
    }

    // grow with the bytes that actually arrive rather than the declared length
    let mut body = Vec::new();
    stream.by_ref().take(length as u64).read_to_end(&mut body)?;
    if body.len() < length {
        return Ok(None);
    }

    Message::from_bytes(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use std::io::Cursor;

    fn sample_transaction() -> Transaction {
        Transaction::from_parts("tx-1", "alice", "bob", 2.5, 10.0).unwrap()
    }

    #[test]
    fn test_kind_strings() {
        for (kind, text) in [
            (MessageType::NewTransaction, "NEW_TRANSACTION"),
            (MessageType::NewBlock, "NEW_BLOCK"),
            (MessageType::RequestChain, "REQUEST_CHAIN"),
            (MessageType::ResponseChain, "RESPONSE_CHAIN"),
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(text));
            assert_eq!(kind.to_string(), text);
            assert_eq!(serde_json::from_value::<MessageType>(json!(text)).unwrap(), kind);
        }
    }

    #[test]
    fn test_wire_text() {
        let mut message = Message::request_chain();
        message.sender = "localhost:5000".to_string();

        let frame = message.to_bytes().unwrap();
        let body = br#"{"payload": {}, "sender": "localhost:5000", "type": "REQUEST_CHAIN"}"#;

        assert_eq!(&frame[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&frame[4..], &body[..]);
    }

    #[test]
    fn test_decode_payloads() {
        let transaction = sample_transaction();
        match Message::new_transaction(&transaction).decode().unwrap() {
            Payload::NewTransaction(decoded) => {
                assert_eq!(decoded, transaction);
                assert_eq!(decoded.amount(), 2.5);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let blockchain = Blockchain::new().unwrap();
        let genesis = blockchain.last_block();
        match Message::new_block(genesis).decode().unwrap() {
            Payload::NewBlock(decoded) => assert_eq!(decoded.hash(), genesis.hash()),
            other => panic!("unexpected payload {:?}", other),
        }

        assert!(matches!(
            Message::request_chain().decode().unwrap(),
            Payload::RequestChain
        ));

        match Message::response_chain(&blockchain.snapshot()).decode().unwrap() {
            Payload::ResponseChain(snapshot) => {
                assert_eq!(snapshot.chain.len(), 1);
                assert!(snapshot.pending_transactions.is_empty());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_invalid_payloads() {
        let bad_amount = Message::new(
            MessageType::NewTransaction,
            json!({"transaction": {
                "id": "x", "origem": "a", "destino": "b", "valor": 0, "timestamp": 1.0
            }}),
        );
        assert!(matches!(
            bad_amount.decode(),
            Err(ProtocolError::InvalidPayload { kind: MessageType::NewTransaction, .. })
        ));

        let missing = Message::new(MessageType::NewBlock, json!({}));
        assert!(missing.decode().is_err());

        let no_blockchain = Message::new(MessageType::ResponseChain, json!({}));
        match no_blockchain.decode().unwrap() {
            Payload::ResponseChain(snapshot) => assert!(snapshot.chain.is_empty()),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_envelope_parsing() {
        let message = Message::from_bytes(br#"{"type": "REQUEST_CHAIN", "payload": {}}"#).unwrap();
        assert_eq!(message.kind, MessageType::RequestChain);
        assert_eq!(message.sender, "");

        assert!(Message::from_bytes(br#"{"type": "PING", "payload": {}}"#).is_err());
        assert!(Message::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_frame_round_trip() {
        let mut message = Message::new_transaction(&sample_transaction());
        message.sender = "127.0.0.1:6000".to_string();

        let mut buffer = Vec::new();
        write_message(&mut buffer, &message).unwrap();

        let mut cursor = Cursor::new(buffer);
        let read = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(read.kind, MessageType::NewTransaction);
        assert_eq!(read.sender, "127.0.0.1:6000");
        assert_eq!(read.payload, message.payload);
    }

    #[test]
    fn test_short_frames_yield_nothing() {
        assert!(read_message(&mut Cursor::new(Vec::<u8>::new())).unwrap().is_none());
        assert!(read_message(&mut Cursor::new(vec![0u8, 0])).unwrap().is_none());
        assert!(read_message(&mut Cursor::new(vec![0u8, 0, 0, 0])).unwrap().is_none());

        let frame = Message::request_chain().to_bytes().unwrap();
        let truncated = frame[..frame.len() - 3].to_vec();
        assert!(read_message(&mut Cursor::new(truncated)).unwrap().is_none());
    }
}
