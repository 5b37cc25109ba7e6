use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result, anyhow, ensure};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use whisperpay_core::SealedPayload;

pub const AES_256_GCM: &str = "AES-256-GCM";

/// Length of the per-user key in bytes.
pub const KEY_LEN: usize = 32;

const TAG_LEN: usize = 16;

/// Authenticated encryption of payment payloads under a per-user key.
pub trait PayloadSealer: Send + Sync {
    /// A fresh random key, stored once per user and reused for every payload.
    fn generate_key(&self) -> Vec<u8>;

    fn seal(&self, key: &[u8], payload: &[u8]) -> Result<SealedPayload>;
}

/// AES-256-GCM with a random 96-bit nonce per message.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmSealer;

impl AesGcmSealer {
    /// Decrypts a payload produced by [`PayloadSealer::seal`] under the same key.
    pub fn open(&self, key: &[u8], sealed: &SealedPayload) -> Result<Vec<u8>> {
        ensure!(sealed.algo == AES_256_GCM, "unsupported algorithm {}", sealed.algo);
        let cipher = Aes256Gcm::new_from_slice(key).context("key must be 32 bytes")?;

        let iv = STANDARD.decode(&sealed.iv)?;
        ensure!(iv.len() == 12, "iv must be 12 bytes");
        let mut data = STANDARD.decode(&sealed.ciphertext)?;
        data.extend(STANDARD.decode(&sealed.tag)?);

        cipher
            .decrypt(Nonce::from_slice(&iv), data.as_slice())
            .map_err(|_| anyhow!("payload authentication failed"))
    }
}

impl PayloadSealer for AesGcmSealer {
    fn generate_key(&self) -> Vec<u8> {
        Aes256Gcm::generate_key(&mut OsRng).to_vec()
    }

    fn seal(&self, key: &[u8], payload: &[u8]) -> Result<SealedPayload> {
        let cipher = Aes256Gcm::new_from_slice(key).context("key must be 32 bytes")?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        // The AEAD output is ciphertext followed by the 16-byte tag.
        let mut sealed = cipher
            .encrypt(&nonce, payload)
            .map_err(|_| anyhow!("payload encryption failed"))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(SealedPayload {
            algo: AES_256_GCM.to_string(),
            iv: STANDARD.encode(nonce),
            tag: STANDARD.encode(tag),
            ciphertext: STANDARD.encode(sealed),
        })
    }
}
