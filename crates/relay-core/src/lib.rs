//! # relay-core
//!
//! Shared wire library for the identifier relay: the routing envelope
//! ([`Packet`]), the named signals exchanged with every connection
//! ([`Signal`]), and the binary codec that turns both into bytes.
//!
//! The crate has no dependencies on sockets, async runtimes, or the relay's
//! registry.  Both the server and any Rust client use it to speak the same
//! frames.
//!
//! # How a message travels
//!
//! ```text
//! client "a"                       relay                        client "b"
//! Packet{to:"b",data}  ──Signal::Message──▶  stamps from="a"
//!                                            Packet{from:"a",data} ──Signal::Message──▶
//! ```
//!
//! If `"b"` is unknown, the relay answers `"a"` with `Signal::NotFound("b")`.

pub mod protocol;

pub use protocol::codec::{decode_packet, decode_signal, encode_packet, encode_signal, CodecError};
pub use protocol::messages::{Packet, Signal, SignalType};
