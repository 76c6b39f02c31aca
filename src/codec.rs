//! Reversible encryption for student contact fields.
//!
//! Stored form is `base64(nonce || ciphertext || tag)`. A fresh 96-bit nonce is
//! drawn for every value, so equal phone numbers never produce equal text.

use crate::error::{CoreError, CoreResult};
use crate::model::{Contact, SealedContact};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

pub trait ContactCodec: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> CoreResult<String>;
    fn decrypt(&self, stored: &str) -> CoreResult<String>;

    fn seal(&self, contact: &Contact) -> CoreResult<SealedContact> {
        Ok(SealedContact {
            parent_phone: seal_opt(self, contact.parent_phone.as_deref())?,
            emergency_phone: seal_opt(self, contact.emergency_phone.as_deref())?,
        })
    }

    fn open(&self, sealed: &SealedContact) -> CoreResult<Contact> {
        Ok(Contact {
            parent_phone: open_opt(self, sealed.parent_phone.as_deref())?,
            emergency_phone: open_opt(self, sealed.emergency_phone.as_deref())?,
        })
    }
}

fn seal_opt<C: ContactCodec + ?Sized>(codec: &C, v: Option<&str>) -> CoreResult<Option<String>> {
    v.map(|p| codec.encrypt(p)).transpose()
}

fn open_opt<C: ContactCodec + ?Sized>(codec: &C, v: Option<&str>) -> CoreResult<Option<String>> {
    v.map(|c| codec.decrypt(c)).transpose()
}

pub struct AesGcmCodec {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl AesGcmCodec {
    pub fn new(key: &[u8; 32]) -> CoreResult<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| CoreError::Internal("failed to create AES-256-GCM key".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Key given as base64 of exactly 32 bytes.
    pub fn from_base64(key: &str) -> CoreResult<Self> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|_| CoreError::validation("codec.key", "must be base64"))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::validation("codec.key", "must decode to 32 bytes"))?;
        Self::new(&key)
    }

    pub fn generate_key() -> CoreResult<String> {
        let mut key = [0u8; 32];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| CoreError::Internal("failed to generate random key".to_string()))?;
        Ok(STANDARD.encode(key))
    }
}

impl ContactCodec for AesGcmCodec {
    fn encrypt(&self, plaintext: &str) -> CoreResult<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| CoreError::Internal("failed to generate random nonce".to_string()))?;
        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| CoreError::Internal("contact encryption failed".to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, stored: &str) -> CoreResult<String> {
        let raw = STANDARD
            .decode(stored)
            .map_err(|_| CoreError::Internal("stored contact is not base64".to_string()))?;
        if raw.len() < NONCE_LEN {
            return Err(CoreError::Internal("stored contact is truncated".to_string()));
        }
        let (nonce, body) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)
            .map_err(|_| CoreError::Internal("bad nonce".to_string()))?;
        let mut in_out = body.to_vec();
        let plain = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| {
                CoreError::Internal("contact decryption failed: wrong key or corrupted data".to_string())
            })?;
        String::from_utf8(plain.to_vec())
            .map_err(|_| CoreError::Internal("decrypted contact is not utf-8".to_string()))
    }
}

/// Identity codec for workspaces without a configured key.
pub struct PlainCodec;

impl ContactCodec for PlainCodec {
    fn encrypt(&self, plaintext: &str) -> CoreResult<String> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, stored: &str) -> CoreResult<String> {
        Ok(stored.to_string())
    }
}
