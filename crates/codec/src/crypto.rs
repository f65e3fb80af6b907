//! Per-channel frame sealing. Every channel (see spec.md §5, Channel layer)
//! is configured with a [`SharedKey`]: either `Plaintext`, where integrity is
//! only a [`crate::fingerprint`] CRC check, or `Aes256Gcm`, where each frame
//! is sealed with a fresh random nonce and an authentication tag. A frame
//! that fails to open is silently dropped by the channel — see spec.md §7,
//! "wire errors never reach the application".

use aws_lc_rs::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN},
    rand::{SecureRandom, SystemRandom},
};

use crate::Error;

/// A channel's symmetric key material, or the absence of one.
#[derive(Clone)]
pub enum SharedKey {
    /// No encryption: frames carry a plaintext [`crate::fingerprint`] tail
    /// only. Used for loopback/test channels and channels explicitly
    /// configured without a pre-shared key.
    Plaintext,
    /// AES-256-GCM, keyed with a 32-byte pre-shared secret.
    Aes256Gcm([u8; 32]),
}

impl SharedKey {
    pub fn from_bytes(key: &[u8]) -> Result<Self, Error> {
        let mut buf = [0u8; 32];
        if key.len() != 32 {
            return Err(Error::FrameFormat);
        }
        buf.copy_from_slice(key);
        Ok(Self::Aes256Gcm(buf))
    }
}

/// Wrap an encoded frame for wire transmission: appends a CRC tail under
/// [`SharedKey::Plaintext`], or seals it (random 12-byte nonce prefix, GCM
/// tag suffix) under [`SharedKey::Aes256Gcm`].
pub fn seal(key: &SharedKey, frame: &[u8]) -> Result<Vec<u8>, Error> {
    match key {
        SharedKey::Plaintext => {
            let mut out = Vec::with_capacity(frame.len() + 4);
            out.extend_from_slice(frame);
            out.extend_from_slice(&crate::fingerprint(frame).to_be_bytes());
            Ok(out)
        }
        SharedKey::Aes256Gcm(key_bytes) => {
            let unbound = UnboundKey::new(&AES_256_GCM, key_bytes).map_err(|_| Error::Mac)?;
            let key = LessSafeKey::new(unbound);

            let mut nonce_bytes = [0u8; NONCE_LEN];
            SystemRandom::new()
                .fill(&mut nonce_bytes)
                .map_err(|_| Error::Mac)?;
            let nonce = Nonce::assume_unique_for_key(nonce_bytes);

            let mut in_out = frame.to_vec();
            key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
                .map_err(|_| Error::Mac)?;

            let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
            out.extend_from_slice(&nonce_bytes);
            out.extend_from_slice(&in_out);
            Ok(out)
        }
    }
}

/// Inverse of [`seal`]. Returns `Err(Error::Mac)` on any tamper or truncation
/// — the caller (channel read loop) drops the frame and logs, never panics.
pub fn open(key: &SharedKey, wire: &[u8]) -> Result<Vec<u8>, Error> {
    match key {
        SharedKey::Plaintext => {
            if wire.len() < 4 {
                return Err(Error::Mac);
            }
            let (frame, tail) = wire.split_at(wire.len() - 4);
            let mut expected = [0u8; 4];
            expected.copy_from_slice(tail);
            if crate::fingerprint(frame).to_be_bytes() != expected {
                return Err(Error::Mac);
            }
            Ok(frame.to_vec())
        }
        SharedKey::Aes256Gcm(key_bytes) => {
            if wire.len() < NONCE_LEN {
                return Err(Error::Mac);
            }
            let (nonce_bytes, sealed) = wire.split_at(NONCE_LEN);
            let mut nonce_buf = [0u8; NONCE_LEN];
            nonce_buf.copy_from_slice(nonce_bytes);
            let nonce = Nonce::assume_unique_for_key(nonce_buf);

            let unbound = UnboundKey::new(&AES_256_GCM, key_bytes).map_err(|_| Error::Mac)?;
            let key = LessSafeKey::new(unbound);

            let mut in_out = sealed.to_vec();
            let plaintext = key
                .open_in_place(nonce, Aad::empty(), &mut in_out)
                .map_err(|_| Error::Mac)?;
            Ok(plaintext.to_vec())
        }
    }
}

/// CRC32 frame fingerprint (re-exported at the crate root as
/// [`crate::fingerprint`]; kept here too since the channel layer reaches for
/// crypto helpers from this module).
pub use crate::fingerprint;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_round_trip() {
        let key = SharedKey::Plaintext;
        let frame = b"hello frame";
        let wire = seal(&key, frame).unwrap();
        assert_eq!(open(&key, &wire).unwrap(), frame);
    }

    #[test]
    fn plaintext_tamper_detected() {
        let key = SharedKey::Plaintext;
        let mut wire = seal(&key, b"hello frame").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        assert!(open(&key, &wire).is_err());
    }

    #[test]
    fn aes_gcm_round_trip() {
        let key = SharedKey::from_bytes(&[7u8; 32]).unwrap();
        let frame = b"super secret payload";
        let wire = seal(&key, frame).unwrap();
        assert_eq!(open(&key, &wire).unwrap(), frame);
    }

    #[test]
    fn aes_gcm_tamper_detected() {
        let key = SharedKey::from_bytes(&[7u8; 32]).unwrap();
        let mut wire = seal(&key, b"super secret payload").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        assert!(open(&key, &wire).is_err());
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let a = SharedKey::from_bytes(&[1u8; 32]).unwrap();
        let b = SharedKey::from_bytes(&[2u8; 32]).unwrap();
        let wire = seal(&a, b"hello").unwrap();
        assert!(open(&b, &wire).is_err());
    }
}
