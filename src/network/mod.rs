// Network module
//
// Peer-to-peer layer:
// - Wire messages and length-prefixed framing
// - The node: listener, dispatch, gossip and chain sync

pub mod node;
pub mod protocol;

pub use node::{Node, NodeError};
pub use protocol::{Message, MessageType, Payload, ProtocolError};
