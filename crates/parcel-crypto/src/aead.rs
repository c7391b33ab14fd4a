//! Incremental AES-256/GCM
//!
//! The `aes-gcm` crate only works on whole buffers, while the attachment
//! stream has to be decrypted as it arrives. `Aes256GcmMode` assembles the
//! same construction from its parts (AES block cipher, 32-bit big-endian
//! counter mode, GHASH) so data can be fed through `update()` in pieces of
//! any size. No associated data is authenticated.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, InnerIvInit, KeyInit, StreamCipher};
use aes::Aes256;
use ctr::{Ctr32BE, CtrCore};
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use parcel_core::{AeadError, ParcelError, ParcelResult};

use crate::keys::SymmetricKey;

const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// An incremental AEAD cipher mode.
///
/// `start` must be called once per message before `update`. `finish` ends the
/// message: when encrypting it encrypts `buf` in place and appends the tag,
/// when decrypting `buf` holds the last ciphertext bytes followed by the tag
/// and is replaced by the remaining plaintext once the tag verifies.
pub trait AeadMode {
    fn start(&mut self, iv: &[u8]) -> ParcelResult<()>;

    /// Encrypt or decrypt `buf` in place.
    fn update(&mut self, buf: &mut [u8]) -> Result<(), AeadError>;

    fn finish(&mut self, buf: &mut Vec<u8>) -> Result<(), AeadError>;

    fn tag_size(&self) -> usize;

    fn direction(&self) -> Direction;
}

/// The supported AEAD suites. There is exactly one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AeadSuite {
    #[default]
    Aes256Gcm,
}

impl AeadSuite {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256/GCM",
        }
    }

    pub fn key_size(&self) -> usize {
        match self {
            Self::Aes256Gcm => 32,
        }
    }

    pub fn tag_size(&self) -> usize {
        match self {
            Self::Aes256Gcm => 16,
        }
    }

    /// Instantiate the suite's cipher mode for `key`.
    pub fn mode(&self, key: &SymmetricKey, direction: Direction) -> ParcelResult<Aes256GcmMode> {
        if key.len() != self.key_size() {
            return Err(ParcelError::InvalidKey(format!(
                "{} needs a {}-bit key, got {} bits",
                self.name(),
                self.key_size() * 8,
                key.bit_size()
            )));
        }
        Aes256GcmMode::new(key.as_bytes(), direction)
    }
}

impl std::fmt::Display for AeadSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-message state, present between `start` and `finish`.
struct GcmState {
    ctr: Ctr32BE<Aes256>,
    ghash: GHash,
    /// E_K(J0), XORed into the GHASH output to form the tag
    tag_mask: [u8; BLOCK_SIZE],
    /// Ciphertext not yet absorbed because it does not fill a GHASH block
    pending: Vec<u8>,
    text_len: u64,
}

impl GcmState {
    fn absorb(&mut self, mut data: &[u8]) {
        if !self.pending.is_empty() {
            let take = (BLOCK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() < BLOCK_SIZE {
                return;
            }
            self.ghash.update_padded(&self.pending);
            self.pending.clear();
        }
        let full = data.len() - data.len() % BLOCK_SIZE;
        if full > 0 {
            self.ghash.update_padded(&data[..full]);
        }
        self.pending.extend_from_slice(&data[full..]);
    }

    fn tag(mut self) -> [u8; BLOCK_SIZE] {
        if !self.pending.is_empty() {
            self.ghash.update_padded(&self.pending);
        }
        // no associated data, so the AAD length half stays zero
        let mut lengths = [0u8; BLOCK_SIZE];
        lengths[8..].copy_from_slice(&(self.text_len * 8).to_be_bytes());
        self.ghash.update_padded(&lengths);

        let mut tag = [0u8; BLOCK_SIZE];
        for (t, (s, m)) in tag
            .iter_mut()
            .zip(self.ghash.finalize().iter().zip(self.tag_mask.iter()))
        {
            *t = s ^ m;
        }
        self.tag_mask.zeroize();
        tag
    }
}

/// AES-256 in Galois/Counter mode with a 128-bit tag.
pub struct Aes256GcmMode {
    cipher: Aes256,
    direction: Direction,
    state: Option<GcmState>,
}

impl Aes256GcmMode {
    pub fn new(key: &[u8], direction: Direction) -> ParcelResult<Self> {
        let cipher = Aes256::new_from_slice(key)
            .map_err(|_| ParcelError::InvalidKey(format!("AES-256 key of {} bytes", key.len())))?;
        Ok(Self {
            cipher,
            direction,
            state: None,
        })
    }

    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.cipher
            .encrypt_block(GenericArray::from_mut_slice(block.as_mut_slice()));
    }

    /// Pre-counter block J0 for `iv`
    fn initial_counter(&self, ghash_key: &[u8; BLOCK_SIZE], iv: &[u8]) -> [u8; BLOCK_SIZE] {
        let mut j0 = [0u8; BLOCK_SIZE];
        if iv.len() == 12 {
            j0[..12].copy_from_slice(iv);
            j0[15] = 1;
        } else {
            let mut ghash = GHash::new(GenericArray::from_slice(ghash_key));
            ghash.update_padded(iv);
            let mut lengths = [0u8; BLOCK_SIZE];
            lengths[8..].copy_from_slice(&(iv.len() as u64 * 8).to_be_bytes());
            ghash.update_padded(&lengths);
            j0.copy_from_slice(ghash.finalize().as_slice());
        }
        j0
    }

    fn state_mut(&mut self) -> Result<&mut GcmState, AeadError> {
        self.state.as_mut().ok_or(AeadError::NotStarted)
    }
}

impl AeadMode for Aes256GcmMode {
    fn start(&mut self, iv: &[u8]) -> ParcelResult<()> {
        if iv.is_empty() {
            return Err(ParcelError::InvalidArgument("GCM IV must not be empty".into()));
        }

        let mut ghash_key = [0u8; BLOCK_SIZE];
        self.encrypt_block(&mut ghash_key);

        let j0 = self.initial_counter(&ghash_key, iv);
        let mut tag_mask = j0;
        self.encrypt_block(&mut tag_mask);

        let mut counter = j0;
        let low = u32::from_be_bytes([j0[12], j0[13], j0[14], j0[15]]).wrapping_add(1);
        counter[12..].copy_from_slice(&low.to_be_bytes());

        let ctr = Ctr32BE::<Aes256>::from_core(CtrCore::inner_iv_init(
            self.cipher.clone(),
            GenericArray::from_slice(&counter),
        ));
        let ghash = GHash::new(GenericArray::from_slice(&ghash_key));
        ghash_key.zeroize();

        self.state = Some(GcmState {
            ctr,
            ghash,
            tag_mask,
            pending: Vec::with_capacity(BLOCK_SIZE),
            text_len: 0,
        });
        Ok(())
    }

    fn update(&mut self, buf: &mut [u8]) -> Result<(), AeadError> {
        let direction = self.direction;
        let state = self.state_mut()?;
        match direction {
            Direction::Encrypt => {
                state.ctr.apply_keystream(buf);
                state.absorb(buf);
            }
            Direction::Decrypt => {
                state.absorb(buf);
                state.ctr.apply_keystream(buf);
            }
        }
        state.text_len += buf.len() as u64;
        Ok(())
    }

    fn finish(&mut self, buf: &mut Vec<u8>) -> Result<(), AeadError> {
        if self.state.is_none() {
            return Err(AeadError::NotStarted);
        }
        match self.direction {
            Direction::Encrypt => {
                self.update(buf)?;
                let state = self.state.take().ok_or(AeadError::NotStarted)?;
                buf.extend_from_slice(&state.tag());
                Ok(())
            }
            Direction::Decrypt => {
                if buf.len() < BLOCK_SIZE {
                    self.state = None;
                    return Err(AeadError::Truncated {
                        len: buf.len(),
                        tag_size: BLOCK_SIZE,
                    });
                }
                let body_len = buf.len() - BLOCK_SIZE;
                self.update(&mut buf[..body_len])?;
                let state = self.state.take().ok_or(AeadError::NotStarted)?;
                let expected = state.tag();
                if !bool::from(expected.ct_eq(&buf[body_len..])) {
                    buf.zeroize();
                    buf.clear();
                    return Err(AeadError::TagMismatch);
                }
                buf.truncate(body_len);
                Ok(())
            }
        }
    }

    fn tag_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn direction(&self) -> Direction {
        self.direction
    }
}

impl std::fmt::Debug for Aes256GcmMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aes256GcmMode")
            .field("direction", &self.direction)
            .field("started", &self.state.is_some())
            .finish()
    }
}
