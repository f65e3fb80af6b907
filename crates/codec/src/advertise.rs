//! `RouterAdvertise` and `LogicalAdvertise` — the two control frames routers
//! exchange to build physical and logical routing tables (spec.md §6, §9).
//! Both share the `Message` envelope (see [`crate::message`]) with a fixed
//! `type_tag` and a payload that this module encodes/decodes directly,
//! rather than going through the [`crate::catalog`] (these are wire-level
//! fabric frames, not application messages).

use crate::{Error, endpoint::PhysicalEp};

use std::net::SocketAddr;

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

pub const ROUTER_ADVERTISE_TAG: &str = "mesh.router-advertise";
pub const LOGICAL_ADVERTISE_TAG: &str = "mesh.logical-advertise";

/// A router's self-announcement: identity, transport addresses, and the
/// endpoint-set ID its `LogicalAdvertise` frames (if any follow) apply to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterAdvertise {
    pub router_ep: PhysicalEp,
    pub capabilities: u32,
    pub endpoint_set_id: Uuid,
    pub udp_ep: Option<SocketAddr>,
    pub tcp_ep: Option<SocketAddr>,
    pub advertise_ttl: u8,
}

impl RouterAdvertise {
    pub const CAP_P2P: u32 = 1 << 0;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_str(&mut buf, &self.router_ep.to_string());
        buf.put_u32(self.capabilities);
        buf.put_slice(self.endpoint_set_id.as_bytes());
        put_opt_addr(&mut buf, self.udp_ep);
        put_opt_addr(&mut buf, self.tcp_ep);
        buf.put_u8(self.advertise_ttl);
        buf
    }

    pub fn decode(mut cur: &[u8]) -> Result<Self, Error> {
        let router_ep: PhysicalEp = take_str(&mut cur)?.parse()?;
        let capabilities = take_u32(&mut cur)?;
        let endpoint_set_id = take_uuid(&mut cur)?;
        let udp_ep = take_opt_addr(&mut cur)?;
        let tcp_ep = take_opt_addr(&mut cur)?;
        let advertise_ttl = take_u8(&mut cur)?;
        Ok(Self {
            router_ep,
            capabilities,
            endpoint_set_id,
            udp_ep,
            tcp_ep,
            advertise_ttl,
        })
    }

    pub fn is_p2p(&self) -> bool {
        self.capabilities & Self::CAP_P2P != 0
    }
}

/// One shard of a router's advertised logical endpoint set. A full set may
/// span several frames (`MaxLogicalAdvertiseEPs` per spec.md §6); receivers
/// key accumulation on `endpoint_set_id` and treat a changed ID as "replace
/// wholesale" (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalAdvertise {
    pub endpoint_set_id: Uuid,
    pub shard_index: u16,
    pub shard_count: u16,
    pub endpoints: Vec<String>,
}

impl LogicalAdvertise {
    pub fn encode(&self) -> Result<BytesMut, Error> {
        let mut buf = BytesMut::new();
        buf.put_slice(self.endpoint_set_id.as_bytes());
        buf.put_u16(self.shard_index);
        buf.put_u16(self.shard_count);
        if self.endpoints.len() > u16::MAX as usize {
            return Err(Error::FrameFormat);
        }
        buf.put_u16(self.endpoints.len() as u16);
        for ep in &self.endpoints {
            put_str(&mut buf, ep);
        }
        Ok(buf)
    }

    pub fn decode(mut cur: &[u8]) -> Result<Self, Error> {
        let endpoint_set_id = take_uuid(&mut cur)?;
        let shard_index = take_u16(&mut cur)?;
        let shard_count = take_u16(&mut cur)?;
        let count = take_u16(&mut cur)?;
        let mut endpoints = Vec::with_capacity(count as usize);
        for _ in 0..count {
            endpoints.push(take_str(&mut cur)?.to_string());
        }
        Ok(Self {
            endpoint_set_id,
            shard_index,
            shard_count,
            endpoints,
        })
    }

    pub fn is_last_shard(&self) -> bool {
        self.shard_index + 1 == self.shard_count
    }
}

/// Split a flat endpoint list into `LogicalAdvertise` shards of at most
/// `max_per_shard` endpoints each, all sharing one freshly generated
/// `endpoint_set_id`.
pub fn shard_logical_endpoints(endpoints: &[String], max_per_shard: usize, endpoint_set_id: Uuid) -> Vec<LogicalAdvertise> {
    if endpoints.is_empty() {
        return vec![LogicalAdvertise {
            endpoint_set_id,
            shard_index: 0,
            shard_count: 1,
            endpoints: Vec::new(),
        }];
    }

    let max_per_shard = max_per_shard.max(1);
    let chunks: Vec<&[String]> = endpoints.chunks(max_per_shard).collect();
    let shard_count = chunks.len() as u16;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| LogicalAdvertise {
            endpoint_set_id,
            shard_index: i as u16,
            shard_count,
            endpoints: chunk.to_vec(),
        })
        .collect()
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn put_opt_addr(buf: &mut BytesMut, addr: Option<SocketAddr>) {
    match addr {
        Some(a) => put_str(buf, &a.to_string()),
        None => buf.put_u16(0),
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

fn take_opt_addr(cur: &mut &[u8]) -> Result<Option<SocketAddr>, Error> {
    let s = take_str(cur)?;
    if s.is_empty() {
        Ok(None)
    } else {
        s.parse().map(Some).map_err(|_| Error::FrameFormat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_advertise_round_trip() {
        let adv = RouterAdvertise {
            router_ep: "physical://root/hub/leaf-1".parse().unwrap(),
            capabilities: RouterAdvertise::CAP_P2P,
            endpoint_set_id: Uuid::new_v4(),
            udp_ep: Some("127.0.0.1:9000".parse().unwrap()),
            tcp_ep: None,
            advertise_ttl: 8,
        };
        let encoded = adv.encode();
        let decoded = RouterAdvertise::decode(&encoded).unwrap();
        assert_eq!(decoded, adv);
        assert!(decoded.is_p2p());
    }

    #[test]
    fn logical_advertise_round_trip() {
        let adv = LogicalAdvertise {
            endpoint_set_id: Uuid::new_v4(),
            shard_index: 1,
            shard_count: 2,
            endpoints: vec!["logical://accounts/billing".into(), "logical://accounts/*".into()],
        };
        let encoded = adv.encode().unwrap();
        let decoded = LogicalAdvertise::decode(&encoded).unwrap();
        assert_eq!(decoded, adv);
        assert!(decoded.is_last_shard());
    }

    #[test]
    fn sharding_splits_into_bounded_chunks() {
        let endpoints: Vec<String> = (0..25).map(|i| format!("logical://svc/{i}")).collect();
        let set_id = Uuid::new_v4();
        let shards = shard_logical_endpoints(&endpoints, 10, set_id);
        assert_eq!(shards.len(), 3);
        assert!(shards.iter().all(|s| s.endpoint_set_id == set_id));
        assert_eq!(shards[0].endpoints.len(), 10);
        assert_eq!(shards[2].endpoints.len(), 5);
        assert!(shards.last().unwrap().is_last_shard());
    }

    #[test]
    fn empty_endpoint_list_yields_single_empty_shard() {
        let shards = shard_logical_endpoints(&[], 10, Uuid::new_v4());
        assert_eq!(shards.len(), 1);
        assert!(shards[0].endpoints.is_empty());
    }
}
