//! Process-global catalog of message type tags. Application code registers a
//! decoder/encoder pair for each `type_tag` it wants to exchange as a typed
//! body instead of raw bytes; [`crate::message::Message::payload`] stays
//! `Bytes` on the wire regardless, so the catalog is purely a convenience
//! for callers that want `decode_typed::<T>()` instead of hand-parsing
//! `payload`.

use std::{
    any::{Any, TypeId},
    sync::{Arc, OnceLock, RwLock},
};

use ahash::AHashMap;

use crate::Error;

type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send + Sync>, Error> + Send + Sync>;
type EncodeFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>, Error> + Send + Sync>;

struct Entry {
    type_id: TypeId,
    decode: DecodeFn,
    encode: EncodeFn,
}

static CATALOG: OnceLock<RwLock<AHashMap<String, Entry>>> = OnceLock::new();

fn catalog() -> &'static RwLock<AHashMap<String, Entry>> {
    CATALOG.get_or_init(|| RwLock::new(AHashMap::new()))
}

/// Register a codec for `type_tag`. `decode`/`encode` are typically
/// `serde_json5`-backed closures supplied by the caller; this module does
/// not prescribe a serialization format.
pub fn register<T>(
    type_tag: impl Into<String>,
    decode: impl Fn(&[u8]) -> Result<T, Error> + Send + Sync + 'static,
    encode: impl Fn(&T) -> Result<Vec<u8>, Error> + Send + Sync + 'static,
) where
    T: Any + Send + Sync + 'static,
{
    let entry = Entry {
        type_id: TypeId::of::<T>(),
        decode: Arc::new(move |bytes| {
            let value = decode(bytes)?;
            Ok(Box::new(value) as Box<dyn Any + Send + Sync>)
        }),
        encode: Arc::new(move |value| {
            let value = value
                .downcast_ref::<T>()
                .expect("encode called with mismatched registered type");
            encode(value)
        }),
    };
    catalog().write().unwrap().insert(type_tag.into(), entry);
}

/// Decode `bytes` as the type registered for `type_tag`, downcasting to `T`.
/// Returns [`Error::UnknownType`] if nothing is registered, or panics-free
/// `None` (via `decode_typed` returning an error) if `T` doesn't match what
/// was registered for that tag.
pub fn decode_typed<T: Any + Send + Sync + 'static>(type_tag: &str, bytes: &[u8]) -> Result<T, Error> {
    let guard = catalog().read().unwrap();
    let entry = guard
        .get(type_tag)
        .ok_or_else(|| Error::UnknownType(type_tag.to_string()))?;
    if entry.type_id != TypeId::of::<T>() {
        return Err(Error::UnknownType(type_tag.to_string()));
    }
    let boxed = (entry.decode)(bytes)?;
    Ok(*boxed
        .downcast::<T>()
        .expect("type_id check above guarantees this downcast succeeds"))
}

pub fn encode_typed<T: Any + Send + Sync + 'static>(type_tag: &str, value: &T) -> Result<Vec<u8>, Error> {
    let guard = catalog().read().unwrap();
    let entry = guard
        .get(type_tag)
        .ok_or_else(|| Error::UnknownType(type_tag.to_string()))?;
    (entry.encode)(value)
}

pub fn is_registered(type_tag: &str) -> bool {
    catalog().read().unwrap().contains_key(type_tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Ping {
        seq: u32,
    }

    fn register_ping(tag: &str) {
        register::<Ping>(
            tag,
            |bytes| {
                if bytes.len() != 4 {
                    return Err(Error::FrameFormat);
                }
                let mut buf = [0u8; 4];
                buf.copy_from_slice(bytes);
                Ok(Ping { seq: u32::from_be_bytes(buf) })
            },
            |ping| Ok(ping.seq.to_be_bytes().to_vec()),
        );
    }

    #[test]
    fn round_trips_registered_type() {
        register_ping("test.catalog.ping.a");
        let encoded = encode_typed("test.catalog.ping.a", &Ping { seq: 7 }).unwrap();
        let decoded: Ping = decode_typed("test.catalog.ping.a", &encoded).unwrap();
        assert_eq!(decoded, Ping { seq: 7 });
    }

    #[test]
    fn unknown_tag_errors() {
        let result: Result<Ping, Error> = decode_typed("test.catalog.ping.nonexistent", &[]);
        assert!(matches!(result, Err(Error::UnknownType(_))));
    }

    #[test]
    fn is_registered_reflects_state() {
        assert!(!is_registered("test.catalog.ping.b"));
        register_ping("test.catalog.ping.b");
        assert!(is_registered("test.catalog.ping.b"));
    }
}
