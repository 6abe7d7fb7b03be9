//! Wire codec for the three membership messages.
//!
//! Every message starts with a one byte type tag. Integers are little-endian
//! and fixed width:
//!
//! ```text
//! JoinRequest  : tag(1) | id(4) port(2) | heartbeat(8)
//! JoinReply    : tag(1) | count(4) | count * [id(4) port(2) heartbeat(8)]
//! Heartbeat    : same layout as JoinReply
//! ```
//!
//! The local `last_update` of an entry never goes on the wire.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::id::PeerId;

const JOIN_REQUEST: u8 = 0;
const JOIN_REPLY: u8 = 1;
const HEARTBEAT: u8 = 2;

const TAG_LEN: usize = 1;
const COUNT_LEN: usize = 4;
const HEARTBEAT_LEN: usize = 8;

/// `(peer, heartbeat)` as carried in a message.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct WireEntry {
    pub peer: PeerId,
    pub heartbeat: u64,
}

impl WireEntry {
    pub const ENCODED_LEN: usize = PeerId::ENCODED_LEN + HEARTBEAT_LEN;

    pub fn new(peer: PeerId, heartbeat: u64) -> WireEntry {
        return WireEntry { peer, heartbeat };
    }

    fn put(&self, buf: &mut BytesMut) {
        self.peer.put(buf);
        buf.put_u64_le(self.heartbeat);
    }

    fn get(buf: &mut Bytes) -> WireEntry {
        let peer = PeerId::get(buf);
        let heartbeat = buf.get_u64_le();
        return WireEntry { peer, heartbeat };
    }
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Message {
    JoinRequest { peer: PeerId, heartbeat: u64 },
    JoinReply { entries: Vec<WireEntry> },
    Heartbeat { entries: Vec<WireEntry> },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::JoinRequest { .. } => "JOINREQ",
            Message::JoinReply { .. } => "JOINREP",
            Message::Heartbeat { .. } => "HEARTBEAT",
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Message::JoinRequest { .. } => TAG_LEN + WireEntry::ENCODED_LEN,
            Message::JoinReply { entries } | Message::Heartbeat { entries } => {
                TAG_LEN + COUNT_LEN + entries.len() * WireEntry::ENCODED_LEN
            }
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        match self {
            Message::JoinRequest { peer, heartbeat } => {
                buf.put_u8(JOIN_REQUEST);
                WireEntry::new(*peer, *heartbeat).put(&mut buf);
            }
            Message::JoinReply { entries } => {
                buf.put_u8(JOIN_REPLY);
                put_entries(&mut buf, entries);
            }
            Message::Heartbeat { entries } => {
                buf.put_u8(HEARTBEAT);
                put_entries(&mut buf, entries);
            }
        }
        return buf.freeze();
    }

    pub fn decode(mut buf: Bytes) -> Result<Message, DecodeError> {
        let total = buf.len();
        if total == 0 {
            return Err(DecodeError::Empty);
        }
        let tag = buf.get_u8();
        return match tag {
            JOIN_REQUEST => {
                check_len(TAG_LEN + WireEntry::ENCODED_LEN, total)?;
                let entry = WireEntry::get(&mut buf);
                Ok(Message::JoinRequest { peer: entry.peer, heartbeat: entry.heartbeat })
            }
            JOIN_REPLY => Ok(Message::JoinReply { entries: get_entries(buf, total)? }),
            HEARTBEAT => Ok(Message::Heartbeat { entries: get_entries(buf, total)? }),
            other => Err(DecodeError::UnknownType(other)),
        };
    }
}

fn put_entries(buf: &mut BytesMut, entries: &[WireEntry]) {
    buf.put_u32_le(entries.len() as u32);
    for entry in entries {
        entry.put(buf);
    }
}

fn get_entries(mut buf: Bytes, total: usize) -> Result<Vec<WireEntry>, DecodeError> {
    if buf.remaining() < COUNT_LEN {
        return Err(DecodeError::Truncated { expected: TAG_LEN + COUNT_LEN, actual: total });
    }
    let count = buf.get_u32_le() as usize;
    // saturating so a hostile count cannot overflow the length check
    let expected = count
        .saturating_mul(WireEntry::ENCODED_LEN)
        .saturating_add(TAG_LEN + COUNT_LEN);
    check_len(expected, total)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        entries.push(WireEntry::get(&mut buf));
    }
    return Ok(entries);
}

fn check_len(expected: usize, actual: usize) -> Result<(), DecodeError> {
    if actual < expected {
        return Err(DecodeError::Truncated { expected, actual });
    }
    if actual > expected {
        return Err(DecodeError::TrailingBytes { expected, actual });
    }
    return Ok(());
}

#[cfg(test)]
fn sample_entries() -> Vec<WireEntry> {
    return vec![WireEntry::new(PeerId::new(1, 0), 12), WireEntry::new(PeerId::new(2, 0), 3)];
}

#[test]
fn join_request_layout() {
    let msg = Message::JoinRequest { peer: PeerId::new(2, 0), heartbeat: 0 };
    //when
    let bytes = msg.encode();
    //then
    assert_eq!(&[0u8, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], &bytes[..]);
    assert_eq!(msg, Message::decode(bytes).unwrap());
}

#[test]
fn heartbeat_layout() {
    let msg = Message::Heartbeat { entries: sample_entries() };
    //when
    let bytes = msg.encode();
    //then
    assert_eq!(msg.encoded_len(), bytes.len());
    assert_eq!(HEARTBEAT, bytes[0]);
    assert_eq!(&[2u8, 0, 0, 0], &bytes[1..5]);
    assert_eq!(&[1u8, 0, 0, 0, 0, 0, 12, 0, 0, 0, 0, 0, 0, 0], &bytes[5..19]);
    assert_eq!(msg, Message::decode(bytes).unwrap());
}

#[test]
fn empty_reply_is_valid() {
    let msg = Message::JoinReply { entries: Vec::new() };
    assert_eq!(5, msg.encode().len());
    assert_eq!(msg, Message::decode(msg.encode()).unwrap());
}

#[test]
fn rejects_empty_and_unknown_tag() {
    assert_eq!(Err(DecodeError::Empty), Message::decode(Bytes::new()));
    assert_eq!(Err(DecodeError::UnknownType(7)), Message::decode(Bytes::from_static(&[7, 0, 0])));
}

#[test]
fn rejects_truncated_buffers() {
    let bytes = Message::Heartbeat { entries: sample_entries() }.encode();
    for cut in 1..bytes.len() {
        //when
        let result = Message::decode(bytes.slice(..cut));
        //then
        assert!(matches!(result, Err(DecodeError::Truncated { .. })), "cut at {}: {:?}", cut, result);
    }
    let request = Message::JoinRequest { peer: PeerId::new(3, 1), heartbeat: 5 }.encode();
    assert_eq!(
        Err(DecodeError::Truncated { expected: 15, actual: 10 }),
        Message::decode(request.slice(..10))
    );
}

#[test]
fn rejects_oversized_buffers() {
    let mut bytes = BytesMut::from(&Message::JoinReply { entries: sample_entries() }.encode()[..]);
    bytes.put_u8(0xff);
    assert_eq!(
        Err(DecodeError::TrailingBytes { expected: 33, actual: 34 }),
        Message::decode(bytes.freeze())
    );
}

#[test]
fn rejects_count_larger_than_payload() {
    let mut bytes = BytesMut::new();
    bytes.put_u8(HEARTBEAT);
    bytes.put_u32_le(u32::MAX);
    bytes.put_slice(&[0u8; 14]);
    assert!(matches!(Message::decode(bytes.freeze()), Err(DecodeError::Truncated { .. })));
}
