//! Per-record encryption for temp-file backed stores.
//!
//! Key material is drawn once per store instance from the configured RNG and only ever
//! lives in memory. Nonces come from the same RNG, so a seeded configuration seals
//! deterministically. Once the store is closed the records left in a (not yet deleted)
//! backing file are unrecoverable.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::SharedRng;
use crate::record_store::lock;

const RECORD_AAD_MAGIC: &[u8; 8] = b"FTSTORE1";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

const HEADER_LEN: usize = NONCE_LEN + TAG_LEN;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encrypted record is truncated")]
    TruncatedRecord,
    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("aes-gcm error")]
    Aead,
}

impl From<aes_gcm::aead::Error> for EncryptionError {
    fn from(_: aes_gcm::aead::Error) -> Self {
        EncryptionError::Aead
    }
}

/// Ephemeral cipher owned by a single store instance.
///
/// Payloads are sealed with AES-256-GCM using a fresh random nonce per record; the record
/// index is bound into the associated data so ciphertexts cannot be swapped between slots.
/// Lookup keys are replaced by an HMAC-SHA256 digest so equal keys still collide on disk
/// without revealing their content.
pub struct RecordCipher {
    cipher: Aes256Gcm,
    mac_key: Zeroizing<[u8; KEY_LEN]>,
    rng: SharedRng,
}

impl RecordCipher {
    pub fn generate(rng: &SharedRng) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        let mut mac_key = Zeroizing::new([0u8; KEY_LEN]);
        {
            let mut rng = lock(rng);
            rng.fill_bytes(&mut key[..]);
            rng.fill_bytes(&mut mac_key[..]);
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
        Self {
            cipher,
            mac_key,
            rng: rng.clone(),
        }
    }

    pub fn seal(&self, index: u32, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        lock(&self.rng).fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, &aad_for_index(index), &mut buffer)?;

        let mut out = Vec::with_capacity(HEADER_LEN + buffer.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(tag.as_slice());
        out.extend_from_slice(&buffer);
        Ok(out)
    }

    pub fn open(&self, index: u32, sealed: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if sealed.len() < HEADER_LEN {
            return Err(EncryptionError::TruncatedRecord);
        }
        let (nonce_bytes, rest) = sealed.split_at(NONCE_LEN);
        let (tag_bytes, ciphertext) = rest.split_at(TAG_LEN);

        let mut buffer = ciphertext.to_vec();
        self.cipher.decrypt_in_place_detached(
            Nonce::from_slice(nonce_bytes),
            &aad_for_index(index),
            &mut buffer,
            Tag::from_slice(tag_bytes),
        )?;
        Ok(buffer)
    }

    /// Deterministic digest used in place of a plaintext lookup key.
    pub fn key_digest(&self, key: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key[..])
            .map_err(|_| EncryptionError::InvalidKeyLength)?;
        mac.update(key);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCipher").finish_non_exhaustive()
    }
}

fn aad_for_index(index: u32) -> [u8; 8 + 4] {
    let mut aad = [0u8; 12];
    aad[..8].copy_from_slice(RECORD_AAD_MAGIC);
    aad[8..12].copy_from_slice(&index.to_be_bytes());
    aad
}
