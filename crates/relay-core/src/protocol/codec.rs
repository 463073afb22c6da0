//! Binary codec for relay packets and connection signals.
//!
//! Packet wire format:
//! ```text
//! [version:1][flags:1][from?:2+N][to?:2+N][data_len:4][data:data_len]
//! ```
//! `from` is present when flag bit 0 is set, `to` when flag bit 1 is set.
//!
//! Signal frame wire format:
//! ```text
//! [version:1][signal_type:1][payload_len:4][payload:payload_len]
//! ```
//! All multi-byte integers are big-endian.  Identifiers are UTF-8 with a
//! 2-byte length prefix.  A frame must be consumed exactly: trailing bytes
//! after the declared payload are rejected.

use crate::protocol::messages::{
    packet_flags, Packet, Signal, SignalType, PACKET_MIN_SIZE, PROTOCOL_VERSION,
    SIGNAL_HEADER_SIZE,
};
use thiserror::Error;

/// Errors that can occur while encoding or decoding packets and signals.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The version byte is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The signal type byte is not a recognized value.
    #[error("unknown signal type: 0x{0:02X}")]
    UnknownSignalType(u8),

    /// A field could not be parsed (bad flags, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A declared length does not match the data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// Bytes remain after the last field.
    #[error("{0} trailing bytes after end of frame")]
    TrailingBytes(usize),

    /// An identifier is too long for its 2-byte length prefix.
    #[error("identifier of {0} bytes exceeds the 65535-byte limit")]
    IdentifierTooLong(usize),
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// Encodes a [`Packet`] into bytes.
///
/// # Errors
///
/// Returns [`CodecError::IdentifierTooLong`] if `from` or `to` does not fit
/// the 2-byte length prefix, and [`CodecError::MalformedPayload`] if `data`
/// exceeds `u32::MAX` bytes.
///
/// # Examples
///
/// ```rust
/// use relay_core::protocol::{decode_packet, encode_packet, Packet};
///
/// let packet = Packet::delivered("a", vec![1, 2, 3]);
/// let bytes = encode_packet(&packet).unwrap();
/// assert_eq!(decode_packet(&bytes).unwrap(), packet);
/// ```
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let mut flags = 0u8;
    if packet.from.is_some() {
        flags |= packet_flags::HAS_FROM;
    }
    if packet.to.is_some() {
        flags |= packet_flags::HAS_TO;
    }

    let mut buf = Vec::with_capacity(PACKET_MIN_SIZE + packet.data.len() + 16);
    buf.push(PROTOCOL_VERSION);
    buf.push(flags);
    if let Some(from) = &packet.from {
        write_length_prefixed_string(&mut buf, from)?;
    }
    if let Some(to) = &packet.to {
        write_length_prefixed_string(&mut buf, to)?;
    }
    write_length_prefixed_bytes(&mut buf, &packet.data)?;
    Ok(buf)
}

/// Decodes a [`Packet`] that occupies all of `bytes`.
///
/// # Errors
///
/// Returns [`CodecError`] if the bytes are malformed, use an unknown version
/// or unknown flag bits, or contain trailing data.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, CodecError> {
    if bytes.len() < PACKET_MIN_SIZE {
        return Err(CodecError::InsufficientData {
            needed: PACKET_MIN_SIZE,
            available: bytes.len(),
        });
    }

    check_version(bytes[0])?;

    let flags = bytes[1];
    if flags & !packet_flags::KNOWN != 0 {
        return Err(CodecError::MalformedPayload(format!(
            "unknown packet flags: 0b{flags:08b}"
        )));
    }

    let mut offset = 2;
    let from = if flags & packet_flags::HAS_FROM != 0 {
        let (s, end) = read_length_prefixed_string(bytes, offset)?;
        offset = end;
        Some(s)
    } else {
        None
    };
    let to = if flags & packet_flags::HAS_TO != 0 {
        let (s, end) = read_length_prefixed_string(bytes, offset)?;
        offset = end;
        Some(s)
    } else {
        None
    };

    let (data, end) = read_length_prefixed_bytes(bytes, offset)?;
    if end != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - end));
    }

    Ok(Packet { from, to, data })
}

// ── Signal ────────────────────────────────────────────────────────────────────

/// Encodes a [`Signal`] into a complete frame including the 6-byte header.
///
/// # Errors
///
/// Returns [`CodecError`] if an identifier or payload is too long to encode.
///
/// # Examples
///
/// ```rust
/// use relay_core::protocol::{decode_signal, encode_signal, Signal};
///
/// let signal = Signal::NotFound("ghost".to_string());
/// let bytes = encode_signal(&signal).unwrap();
/// assert_eq!(decode_signal(&bytes).unwrap(), signal);
/// ```
pub fn encode_signal(signal: &Signal) -> Result<Vec<u8>, CodecError> {
    let payload = encode_signal_payload(signal)?;
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        CodecError::MalformedPayload(format!("signal payload of {} bytes", payload.len()))
    })?;

    let mut buf = Vec::with_capacity(SIGNAL_HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(signal.signal_type() as u8);
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one [`Signal`] frame that occupies all of `bytes`.
///
/// # Errors
///
/// Returns [`CodecError`] if the header is short or invalid, the payload
/// length disagrees with the bytes available, or the payload is malformed.
/// A [`Signal::Message`] payload is **not** decoded here; call
/// [`decode_packet`] on it separately.
pub fn decode_signal(bytes: &[u8]) -> Result<Signal, CodecError> {
    if bytes.len() < SIGNAL_HEADER_SIZE {
        return Err(CodecError::InsufficientData {
            needed: SIGNAL_HEADER_SIZE,
            available: bytes.len(),
        });
    }

    check_version(bytes[0])?;

    let type_byte = bytes[1];
    let signal_type =
        SignalType::try_from(type_byte).map_err(|_| CodecError::UnknownSignalType(type_byte))?;

    let payload_len = read_u32(bytes, 2)? as usize;
    let available = bytes.len() - SIGNAL_HEADER_SIZE;
    if payload_len > available {
        return Err(CodecError::PayloadLengthMismatch {
            declared: payload_len,
            available,
        });
    }
    if payload_len < available {
        return Err(CodecError::TrailingBytes(available - payload_len));
    }

    decode_signal_payload(signal_type, &bytes[SIGNAL_HEADER_SIZE..])
}

fn encode_signal_payload(signal: &Signal) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    match signal {
        Signal::Message(packet) => buf.extend_from_slice(packet),
        Signal::Error { message, data } => {
            write_length_prefixed_string(&mut buf, message)?;
            write_length_prefixed_bytes(&mut buf, data)?;
        }
        Signal::NotFound(identifier) => write_length_prefixed_string(&mut buf, identifier)?,
        Signal::Presence(hosts) => {
            let count = u16::try_from(hosts.len()).map_err(|_| {
                CodecError::MalformedPayload(format!("{} hosts exceed presence limit", hosts.len()))
            })?;
            buf.extend_from_slice(&count.to_be_bytes());
            for host in hosts {
                write_length_prefixed_string(&mut buf, host)?;
            }
        }
        Signal::PresenceRequest => {} // empty payload
    }
    Ok(buf)
}

fn decode_signal_payload(signal_type: SignalType, p: &[u8]) -> Result<Signal, CodecError> {
    let (signal, end) = match signal_type {
        SignalType::Message => (Signal::Message(p.to_vec()), p.len()),
        SignalType::Error => {
            let (message, msg_end) = read_length_prefixed_string(p, 0)?;
            let (data, end) = read_length_prefixed_bytes(p, msg_end)?;
            (Signal::Error { message, data }, end)
        }
        SignalType::NotFound => {
            let (identifier, end) = read_length_prefixed_string(p, 0)?;
            (Signal::NotFound(identifier), end)
        }
        SignalType::Presence => {
            let count = read_u16(p, 0)? as usize;
            let mut hosts = Vec::with_capacity(count.min(p.len() / 2));
            let mut offset = 2;
            for _ in 0..count {
                let (host, end) = read_length_prefixed_string(p, offset)?;
                hosts.push(host);
                offset = end;
            }
            (Signal::Presence(hosts), offset)
        }
        SignalType::PresenceRequest => (Signal::PresenceRequest, 0),
    };

    if end != p.len() {
        return Err(CodecError::TrailingBytes(p.len() - end));
    }
    Ok(signal)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn check_version(version: u8) -> Result<(), CodecError> {
    if version == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(CodecError::UnsupportedVersion(version))
    }
}

fn read_u16(buf: &[u8], offset: usize) -> Result<u16, CodecError> {
    if buf.len() < offset + 2 {
        return Err(CodecError::InsufficientData {
            needed: offset + 2,
            available: buf.len(),
        });
    }
    Ok(u16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, CodecError> {
    if buf.len() < offset + 4 {
        return Err(CodecError::InsufficientData {
            needed: offset + 4,
            available: buf.len(),
        });
    }
    Ok(u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| CodecError::IdentifierTooLong(s.len()))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), CodecError> {
    if buf.len() < offset + 2 {
        return Err(CodecError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(CodecError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| CodecError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

/// Writes a 4-byte length prefix followed by the raw bytes.
fn write_length_prefixed_bytes(buf: &mut Vec<u8>, data: &[u8]) -> Result<(), CodecError> {
    let len = u32::try_from(data.len()).map_err(|_| {
        CodecError::MalformedPayload(format!("data of {} bytes exceeds u32 length", data.len()))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(data);
    Ok(())
}

/// Reads a 4-byte length prefix and then that many bytes.
fn read_length_prefixed_bytes(buf: &[u8], offset: usize) -> Result<(Vec<u8>, usize), CodecError> {
    let len = read_u32(buf, offset)? as usize;
    let start = offset + 4;
    let available = buf.len() - start;
    if available < len {
        return Err(CodecError::PayloadLengthMismatch {
            declared: len,
            available,
        });
    }
    Ok((buf[start..start + len].to_vec(), start + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::MAX_IDENTIFIER_LEN;

    // ── Packet ───────────────────────────────────────────────────────────────

    #[test]
    fn test_packet_with_both_identifiers_round_trips() {
        let packet = Packet {
            from: Some("a".to_string()),
            to: Some("b".to_string()),
            data: vec![1, 2, 3],
        };
        let bytes = encode_packet(&packet).unwrap();
        assert_eq!(decode_packet(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_packet_layout_for_delivered_packet() {
        let bytes = encode_packet(&Packet::delivered("a", vec![9])).unwrap();
        assert_eq!(
            bytes,
            vec![PROTOCOL_VERSION, packet_flags::HAS_FROM, 0, 1, b'a', 0, 0, 0, 1, 9]
        );
    }

    #[test]
    fn test_packet_empty_data_is_valid() {
        let packet = Packet::addressed("b", Vec::new());
        let bytes = encode_packet(&packet).unwrap();
        assert_eq!(decode_packet(&bytes).unwrap().data, Vec::<u8>::new());
    }

    #[test]
    fn test_decode_packet_too_short_fails() {
        let err = decode_packet(&[PROTOCOL_VERSION, 0]).unwrap_err();
        assert!(matches!(err, CodecError::InsufficientData { needed: 6, available: 2 }));
    }

    #[test]
    fn test_decode_packet_wrong_version_fails() {
        let mut bytes = encode_packet(&Packet::addressed("b", vec![1])).unwrap();
        bytes[0] = 0x7F;
        assert_eq!(decode_packet(&bytes), Err(CodecError::UnsupportedVersion(0x7F)));
    }

    #[test]
    fn test_decode_packet_unknown_flags_fails() {
        let mut bytes = encode_packet(&Packet::addressed("b", vec![1])).unwrap();
        bytes[1] |= 0b1000_0000;
        assert!(matches!(decode_packet(&bytes), Err(CodecError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_packet_truncated_data_fails() {
        let mut bytes = encode_packet(&Packet::addressed("b", vec![1, 2, 3, 4])).unwrap();
        bytes.truncate(bytes.len() - 2);
        assert!(matches!(
            decode_packet(&bytes),
            Err(CodecError::PayloadLengthMismatch { declared: 4, available: 2 })
        ));
    }

    #[test]
    fn test_decode_packet_trailing_bytes_fails() {
        let mut bytes = encode_packet(&Packet::addressed("b", vec![1])).unwrap();
        bytes.push(0xAA);
        assert_eq!(decode_packet(&bytes), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_decode_packet_invalid_utf8_identifier_fails() {
        let bytes = vec![PROTOCOL_VERSION, packet_flags::HAS_TO, 0, 1, 0xFF, 0, 0, 0, 0];
        assert!(matches!(decode_packet(&bytes), Err(CodecError::MalformedPayload(_))));
    }

    #[test]
    fn test_encode_packet_rejects_oversized_identifier() {
        let packet = Packet::addressed("x".repeat(MAX_IDENTIFIER_LEN + 1), vec![]);
        assert_eq!(
            encode_packet(&packet),
            Err(CodecError::IdentifierTooLong(MAX_IDENTIFIER_LEN + 1))
        );
    }

    // ── Signal ───────────────────────────────────────────────────────────────

    #[test]
    fn test_signal_presence_round_trips_in_order() {
        let signal = Signal::Presence(vec!["svc".to_string(), "db".to_string()]);
        let bytes = encode_signal(&signal).unwrap();
        assert_eq!(decode_signal(&bytes).unwrap(), signal);
    }

    #[test]
    fn test_signal_error_keeps_offending_bytes() {
        let signal = Signal::Error {
            message: "invalid message".to_string(),
            data: vec![0xDE, 0xAD],
        };
        let bytes = encode_signal(&signal).unwrap();
        assert_eq!(decode_signal(&bytes).unwrap(), signal);
    }

    #[test]
    fn test_signal_presence_request_has_empty_payload() {
        let bytes = encode_signal(&Signal::PresenceRequest).unwrap();
        assert_eq!(bytes.len(), SIGNAL_HEADER_SIZE);
        assert_eq!(&bytes[2..6], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_signal_message_payload_is_not_decoded() {
        // The relay validates the inner packet separately.
        let signal = Signal::Message(vec![0xFF; 3]);
        let bytes = encode_signal(&signal).unwrap();
        assert_eq!(decode_signal(&bytes).unwrap(), signal);
    }

    #[test]
    fn test_decode_signal_unknown_type_fails() {
        let bytes = vec![PROTOCOL_VERSION, 0x42, 0, 0, 0, 0];
        assert_eq!(decode_signal(&bytes), Err(CodecError::UnknownSignalType(0x42)));
    }

    #[test]
    fn test_decode_signal_short_header_fails() {
        assert!(matches!(
            decode_signal(&[PROTOCOL_VERSION, 0x01]),
            Err(CodecError::InsufficientData { needed: 6, available: 2 })
        ));
    }

    #[test]
    fn test_decode_signal_declared_length_exceeds_data_fails() {
        let bytes = vec![PROTOCOL_VERSION, 0x03, 0, 0, 0, 10, 0, 1];
        assert!(matches!(
            decode_signal(&bytes),
            Err(CodecError::PayloadLengthMismatch { declared: 10, available: 2 })
        ));
    }

    #[test]
    fn test_decode_signal_trailing_bytes_fails() {
        let mut bytes = encode_signal(&Signal::PresenceRequest).unwrap();
        bytes.push(0);
        assert_eq!(decode_signal(&bytes), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_decode_signal_presence_count_exceeds_entries_fails() {
        // count = 2 but only one identifier follows
        let payload = [0u8, 2, 0, 1, b'a'];
        let mut bytes = vec![PROTOCOL_VERSION, SignalType::Presence as u8, 0, 0, 0, 5];
        bytes.extend_from_slice(&payload);
        assert!(matches!(decode_signal(&bytes), Err(CodecError::MalformedPayload(_))));
    }
}
