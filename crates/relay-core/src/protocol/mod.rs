//! Protocol module containing the wire types and the binary codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_packet, decode_signal, encode_packet, encode_signal, CodecError};
pub use messages::*;
