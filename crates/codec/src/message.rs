//! Frame encode/decode for application [`Message`]s, `RouterAdvertise` and
//! `LogicalAdvertise` (see [`crate::advertise`]), all sharing the same
//! envelope, distinguished by `type_tag`.

use crate::{Error, endpoint::MsgEp};

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Header flag bits. A hand-rolled bitset (no `bitflags` dependency — the
/// teacher's codec crate does not carry one, and a `u32` newtype with
/// associated consts is the lighter-weight match for its style).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u32);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const BROADCAST: Flags = Flags(1 << 0);
    pub const KEEP_SESSION_ID: Flags = Flags(1 << 1);
    pub const OPEN_SESSION: Flags = Flags(1 << 2);
    pub const SERVER_SESSION: Flags = Flags(1 << 3);
    pub const RECEIPT_REQUEST: Flags = Flags(1 << 4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn unset(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Self) -> Self::Output {
        Flags(self.0 | rhs.0)
    }
}

/// Property-bag value: either UTF-8 text or an opaque byte string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Bytes(_) => None,
        }
    }
}

/// A fully decoded application message, or `RouterAdvertise`/`LogicalAdvertise`
/// control frame — see spec.md §3 (Message) and §6 (wire formats).
#[derive(Debug, Clone)]
pub struct Message {
    pub version: u8,
    pub from_ep: MsgEp,
    pub to_ep: MsgEp,
    pub receipt_ep: Option<MsgEp>,
    pub ttl: u8,
    pub flags: Flags,
    pub msg_id: Uuid,
    pub session_id: Uuid,
    pub type_tag: String,
    pub properties: Vec<(String, PropertyValue)>,
    pub payload: Bytes,
}

pub const CURRENT_VERSION: u8 = 1;

impl Message {
    pub fn new(type_tag: impl Into<String>, from_ep: MsgEp, to_ep: MsgEp) -> Self {
        Self {
            version: CURRENT_VERSION,
            from_ep,
            to_ep,
            receipt_ep: None,
            ttl: 16,
            flags: Flags::NONE,
            msg_id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            type_tag: type_tag.into(),
            properties: Vec::new(),
            payload: Bytes::new(),
        }
    }

    pub fn get_property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.push((name.into(), value));
    }

    /// Decrement TTL on a hop; returns `false` (and the caller should drop
    /// with `TTLExceeded`) once it reaches zero.
    pub fn decrement_ttl(&mut self) -> bool {
        if self.ttl == 0 {
            return false;
        }
        self.ttl -= 1;
        self.ttl > 0
    }

    /// Deep-copy the mutable header fields before forwarding, per spec.md §9
    /// ("Clone-on-forward"): a fresh `msg_id`, decremented `ttl`, and a
    /// rewritten `from_ep`. The property bag and payload are shared
    /// immutable and simply cloned along (cheap: `Bytes` is refcounted).
    pub fn forward(&self, new_from_ep: MsgEp, preserve_msg_id: bool) -> Self {
        let mut clone = self.clone();
        clone.from_ep = new_from_ep;
        if !preserve_msg_id {
            clone.msg_id = Uuid::new_v4();
        }
        clone.ttl = clone.ttl.saturating_sub(1);
        clone
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut body = BytesMut::with_capacity(256 + self.payload.len());
        body.put_u8(self.version);
        put_str(&mut body, &self.to_ep.to_string());
        put_str(&mut body, &self.from_ep.to_string());
        put_u8_opt_str(&mut body, self.receipt_ep.as_ref().map(|e| e.to_string()));
        body.put_u32(self.flags.bits());
        body.put_u8(self.ttl);
        body.put_slice(self.msg_id.as_bytes());
        body.put_slice(self.session_id.as_bytes());
        put_str(&mut body, &self.type_tag);

        if self.properties.len() > u16::MAX as usize {
            return Err(Error::FrameFormat);
        }
        body.put_u16(self.properties.len() as u16);
        for (name, value) in &self.properties {
            put_str(&mut body, name);
            match value {
                PropertyValue::Text(s) => {
                    body.put_u8(0);
                    put_str(&mut body, s);
                }
                PropertyValue::Bytes(b) => {
                    body.put_u8(1);
                    if b.len() > u32::MAX as usize {
                        return Err(Error::FrameFormat);
                    }
                    body.put_u32(b.len() as u32);
                    body.put_slice(b);
                }
            }
        }

        body.put_u32(self.payload.len() as u32);
        body.put_slice(&self.payload);

        let mut frame = BytesMut::with_capacity(2 + body.len());
        if body.len() > u16::MAX as usize {
            return Err(Error::FrameFormat);
        }
        frame.put_u16(body.len() as u16);
        frame.put_slice(&body);
        Ok(frame.freeze())
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 2 {
            return Err(Error::FrameFormat);
        }
        let frame_len = bytes.get_u16() as usize;
        if bytes.len() < frame_len {
            return Err(Error::FrameFormat);
        }
        let mut cur = &bytes[..frame_len];

        let version = take_u8(&mut cur)?;
        let to_ep: MsgEp = take_str(&mut cur)?.parse()?;
        let from_ep: MsgEp = take_str(&mut cur)?.parse()?;
        let receipt_ep = match take_u8(&mut cur)? {
            0 => None,
            _ => Some(take_str(&mut cur)?.parse()?),
        };
        let flags = Flags::from_bits(take_u32(&mut cur)?);
        let ttl = take_u8(&mut cur)?;
        let msg_id = take_uuid(&mut cur)?;
        let session_id = take_uuid(&mut cur)?;
        let type_tag = take_str(&mut cur)?.to_string();

        let prop_count = take_u16(&mut cur)?;
        let mut properties = Vec::with_capacity(prop_count as usize);
        for _ in 0..prop_count {
            let name = take_str(&mut cur)?.to_string();
            let value = match take_u8(&mut cur)? {
                0 => PropertyValue::Text(take_str(&mut cur)?.to_string()),
                1 => {
                    let len = take_u32(&mut cur)? as usize;
                    if cur.len() < len {
                        return Err(Error::FrameFormat);
                    }
                    let (data, rest) = cur.split_at(len);
                    cur = rest;
                    PropertyValue::Bytes(data.to_vec())
                }
                _ => return Err(Error::FrameFormat),
            };
            properties.push((name, value));
        }

        let payload_len = take_u32(&mut cur)? as usize;
        if cur.len() < payload_len {
            return Err(Error::FrameFormat);
        }
        let payload = Bytes::copy_from_slice(&cur[..payload_len]);

        Ok(Self {
            version,
            from_ep,
            to_ep,
            receipt_ep,
            ttl,
            flags,
            msg_id,
            session_id,
            type_tag,
            properties,
            payload,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message[{} {} -> {} ttl={} session={}]",
            self.type_tag, self.from_ep, self.to_ep, self.ttl, self.session_id
        )
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_u8_opt_str(buf: &mut BytesMut, s: Option<String>) {
    match s {
        Some(s) => {
            buf.put_u8(1);
            put_str(buf, &s);
        }
        None => buf.put_u8(0),
    }
}

fn take_u8(cur: &mut &[u8]) -> Result<u8, Error> {
    if cur.is_empty() {
        return Err(Error::FrameFormat);
    }
    Ok(cur.get_u8())
}

fn take_u16(cur: &mut &[u8]) -> Result<u16, Error> {
    if cur.len() < 2 {
        return Err(Error::FrameFormat);
    }
    Ok(cur.get_u16())
}

fn take_u32(cur: &mut &[u8]) -> Result<u32, Error> {
    if cur.len() < 4 {
        return Err(Error::FrameFormat);
    }
    Ok(cur.get_u32())
}

fn take_uuid(cur: &mut &[u8]) -> Result<Uuid, Error> {
    if cur.len() < 16 {
        return Err(Error::FrameFormat);
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&cur[..16]);
    cur.advance(16);
    Ok(Uuid::from_bytes(buf))
}

fn take_str<'a>(cur: &mut &'a [u8]) -> Result<&'a str, Error> {
    let len = take_u16(cur)? as usize;
    if cur.len() < len {
        return Err(Error::FrameFormat);
    }
    let (data, rest) = cur.split_at(len);
    *cur = rest;
    Ok(std::str::from_utf8(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_basic_message() {
        let from: MsgEp = "physical://root/hub/leaf-1".parse().unwrap();
        let to: MsgEp = "logical://accounts/billing".parse().unwrap();

        let mut msg = Message::new("app.ping", from, to);
        msg.set_property("key", PropertyValue::Text("value".into()));
        msg.set_property("blob", PropertyValue::Bytes(vec![1, 2, 3]));
        msg.payload = Bytes::from_static(b"hello world");

        let encoded = msg.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();

        assert_eq!(decoded.type_tag, "app.ping");
        assert_eq!(decoded.from_ep, msg.from_ep);
        assert_eq!(decoded.to_ep, msg.to_ep);
        assert_eq!(decoded.payload, msg.payload);
        assert_eq!(decoded.properties, msg.properties);
        assert_eq!(decoded.msg_id, msg.msg_id);
    }

    #[test]
    fn decode_of_encode_is_identity() {
        let from: MsgEp = "physical://root".parse().unwrap();
        let to: MsgEp = "physical://root/hub".parse().unwrap();
        let msg = Message::new("app.noop", from, to);
        let encoded = msg.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.type_tag, msg.type_tag);
        assert_eq!(decoded.ttl, msg.ttl);
    }

    #[test]
    fn truncated_frame_is_frame_format_error() {
        let from: MsgEp = "physical://root".parse().unwrap();
        let to: MsgEp = "physical://root/hub".parse().unwrap();
        let msg = Message::new("app.noop", from, to);
        let encoded = msg.encode().unwrap();
        let truncated = &encoded[..encoded.len() - 4];
        assert!(Message::decode(truncated).is_err());
    }

    #[test]
    fn forward_rewrites_msg_id_and_decrements_ttl() {
        let from: MsgEp = "physical://root/hub/leaf-1".parse().unwrap();
        let to: MsgEp = "physical://root/hub/leaf-2".parse().unwrap();
        let msg = Message::new("app.ping", from.clone(), to);

        let forwarded = msg.forward(from, false);
        assert_ne!(forwarded.msg_id, msg.msg_id);
        assert_eq!(forwarded.ttl, msg.ttl - 1);

        let kept = msg.forward(msg.from_ep.clone(), true);
        assert_eq!(kept.msg_id, msg.msg_id);
    }
}
