//! ## Wire codec for the mesh-router messaging fabric
//!
//! A frame is `[u16 frameLen][u8 version][fromEP][toEP][u32 flags][u8 ttl]
//! [16B msgID][16B sessionID][typeTag][u16 propCount]{name, value}*
//! [u32 payloadLen][payload]`. Strings are length-prefixed (`u16` length,
//! UTF-8). See [`message::Message`] for the in-memory representation and
//! [`crypto`] for the optional per-frame encryption wrapper.

pub mod advertise;
pub mod catalog;
pub mod crypto;
pub mod endpoint;
pub mod message;

use std::{array::TryFromSliceError, str::Utf8Error};

/// Wire-level error kinds. These are always local: logged and dropped by the
/// caller, never surfaced to the application (see spec.md §7).
#[derive(Debug)]
pub enum Error {
    /// The frame is too short, has a bad length prefix, or otherwise does
    /// not parse as a well-formed frame.
    FrameFormat,
    /// The frame's MAC did not verify under the channel's shared key.
    Mac,
    /// No decoder is registered in the type catalog for this frame's type tag.
    UnknownType(String),
    Utf8(Utf8Error),
    TryFromSlice(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrameFormat => write!(f, "malformed wire frame"),
            Self::Mac => write!(f, "frame failed integrity check"),
            Self::UnknownType(tag) => write!(f, "no decoder registered for type tag {tag:?}"),
            Self::Utf8(e) => write!(f, "invalid utf8 in frame: {e}"),
            Self::TryFromSlice(e) => write!(f, "truncated fixed-size field: {e}"),
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSlice(value)
    }
}

/// CRC32 frame fingerprint, used as a cheap tamper-evidence check on
/// plaintext frames (channels configured with `SharedKey::Plaintext`).
///
/// # Test
///
/// ```
/// use mesh_router_codec::fingerprint;
///
/// assert_eq!(fingerprint(b"1"), 3498621689);
/// ```
pub fn fingerprint(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes) ^ 0x5354_554e
}
