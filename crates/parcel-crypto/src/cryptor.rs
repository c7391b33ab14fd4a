//! One-shot encryption of small buffers (message bodies, key material)

use parcel_core::{AeadError, ParcelError, ParcelResult};

use crate::aead::{AeadMode, AeadSuite, Direction};
use crate::keys::{generate_iv, SymmetricKey};
use crate::RANDOM_IV_SIZE;

/// Fixed IV for message content. Safe because every message has its own key.
pub const CONTENT_IV: &[u8] = b"content";

/// Fixed IV for the attachment stream of a message
pub const ATTACHMENTS_IV: &[u8] = b"attachments";

/// Whether `encrypt` puts the IV in front of the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrependIv {
    Prepend,
    DontPrepend,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SymmetricCryptor {
    suite: AeadSuite,
}

impl SymmetricCryptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suite(suite: AeadSuite) -> Self {
        Self { suite }
    }

    pub fn suite(&self) -> AeadSuite {
        self.suite
    }

    /// Encrypt `plaintext`, returning `[iv] || ciphertext || tag`.
    ///
    /// Empty plaintext produces no ciphertext and no tag; the IV is still
    /// prepended when asked for.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        key: &SymmetricKey,
        iv: &[u8],
        prepend: PrependIv,
    ) -> ParcelResult<Vec<u8>> {
        let mut mode = self.suite.mode(key, Direction::Encrypt)?;
        check_iv(iv)?;

        let mut out = Vec::with_capacity(iv.len() + plaintext.len() + self.suite.tag_size());
        if prepend == PrependIv::Prepend {
            out.extend_from_slice(iv);
        }
        if plaintext.is_empty() {
            return Ok(out);
        }

        mode.start(iv)?;
        let mut buf = plaintext.to_vec();
        mode.finish(&mut buf)
            .map_err(|e| ParcelError::integrity("SymmetricCryptor::encrypt", e))?;
        out.extend_from_slice(&buf);
        tracing::trace!(plaintext_len = plaintext.len(), out_len = out.len(), "encrypted");
        Ok(out)
    }

    /// Encrypt under a fresh random 96-bit IV, which is prepended.
    pub fn encrypt_with_random_iv(
        &self,
        plaintext: &[u8],
        key: &SymmetricKey,
    ) -> ParcelResult<Vec<u8>> {
        let iv = generate_iv(RANDOM_IV_SIZE);
        self.encrypt(plaintext, key, &iv, PrependIv::Prepend)
    }

    /// Decrypt `ciphertext || tag` under a known IV.
    pub fn decrypt(&self, ciphertext: &[u8], key: &SymmetricKey, iv: &[u8]) -> ParcelResult<Vec<u8>> {
        let mut mode = self.suite.mode(key, Direction::Decrypt)?;
        check_iv(iv)?;
        if ciphertext.is_empty() {
            return Ok(Vec::new());
        }

        mode.start(iv)?;
        let mut buf = ciphertext.to_vec();
        mode.finish(&mut buf).map_err(|e| {
            tracing::warn!(len = ciphertext.len(), error = %e, "decryption failed");
            ParcelError::integrity("SymmetricCryptor::decrypt", e)
        })?;
        Ok(buf)
    }

    /// Decrypt `iv || ciphertext || tag` where the IV is `iv_len` bytes long.
    pub fn decrypt_with_iv_prefix(
        &self,
        iv_and_ciphertext: &[u8],
        key: &SymmetricKey,
        iv_len: usize,
    ) -> ParcelResult<Vec<u8>> {
        if iv_len == 0 {
            return Err(ParcelError::InvalidArgument("IV length must be non-zero".into()));
        }
        if iv_and_ciphertext.is_empty() {
            self.suite.mode(key, Direction::Decrypt)?;
            return Ok(Vec::new());
        }
        if iv_and_ciphertext.len() < iv_len {
            return Err(ParcelError::integrity(
                "SymmetricCryptor::decrypt",
                AeadError::Truncated {
                    len: iv_and_ciphertext.len(),
                    tag_size: self.suite.tag_size(),
                },
            ));
        }
        let (iv, ciphertext) = iv_and_ciphertext.split_at(iv_len);
        self.decrypt(ciphertext, key, iv)
    }
}

fn check_iv(iv: &[u8]) -> ParcelResult<()> {
    if iv.is_empty() {
        return Err(ParcelError::InvalidArgument("IV must not be empty".into()));
    }
    Ok(())
}
