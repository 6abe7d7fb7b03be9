use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};

/// Network endpoint of a member: numeric id plus port.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PeerId {
    id: u32,
    port: u16,
}

impl PeerId {
    /// Size of a peer id on the wire.
    pub const ENCODED_LEN: usize = 6;

    pub const fn new(id: u32, port: u16) -> PeerId {
        return PeerId { id, port };
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.id);
        buf.put_u16_le(self.port);
    }

    /// Caller guarantees at least `ENCODED_LEN` remaining bytes.
    pub(crate) fn get<B: Buf>(buf: &mut B) -> PeerId {
        let id = buf.get_u32_le();
        let port = buf.get_u16_le();
        return PeerId { id, port };
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.port)
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid peer address {0:?}, expected <id>:<port>")]
pub struct ParsePeerIdError(String);

impl FromStr for PeerId {
    type Err = ParsePeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePeerIdError(s.to_string());
        let (id, port) = s.split_once(':').ok_or_else(err)?;
        let id = id.trim().parse::<u32>().map_err(|_| err())?;
        let port = port.trim().parse::<u16>().map_err(|_| err())?;
        return Ok(PeerId::new(id, port));
    }
}

#[test]
fn serialize_deserialize_test() {
    let expected = PeerId::new(42, 7);
    let mut buf = bytes::BytesMut::with_capacity(PeerId::ENCODED_LEN);
    //when
    expected.put(&mut buf);
    //then
    assert_eq!(PeerId::ENCODED_LEN, buf.len());
    assert_eq!(&[42, 0, 0, 0, 7, 0], &buf[..]);
    assert_eq!(expected, PeerId::get(&mut buf.freeze()));
}

#[test]
fn display_and_parse_agree() {
    let peer = PeerId::new(1, 0);
    assert_eq!("1:0", peer.to_string());
    assert_eq!(Ok(peer), "1:0".parse::<PeerId>());
    assert!("1".parse::<PeerId>().is_err());
    assert!("x:0".parse::<PeerId>().is_err());
    assert!("1:70000".parse::<PeerId>().is_err());
}
