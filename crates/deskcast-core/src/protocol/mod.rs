//! Protocol module containing the wire message types and the JSON codec.

pub mod codec;
pub mod event;
pub mod messages;
pub mod sequence;

pub use codec::{decode_client_message, encode_server_message, ProtocolError};
pub use messages::*;
pub use sequence::SequenceCounter;
