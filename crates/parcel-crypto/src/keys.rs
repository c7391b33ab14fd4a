//! Symmetric keys and random key/IV generation

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use parcel_core::{ParcelError, ParcelResult};

use crate::kdf::KeyHierarchy;
use crate::master_key::MasterKey;

pub const MASTER_KEY_BITS: usize = 256;
pub const LOGIN_KEY_BITS: usize = 512;
pub const PRIVATE_DATA_KEY_BITS: usize = 256;
pub const MESSAGE_KEY_BITS: usize = 256;

/// Opaque key bytes. Every derived or generated key is one of these; what it
/// is used for is decided by how it was produced. Zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey {
    bytes: Vec<u8>,
}

impl SymmetricKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn from_hex(hex_str: &str) -> ParcelResult<Self> {
        hex::decode(hex_str.trim())
            .map(Self::from_bytes)
            .map_err(|e| ParcelError::InvalidKey(format!("hex decode: {e}")))
    }

    pub fn from_base64(b64: &str) -> ParcelResult<Self> {
        STANDARD
            .decode(b64.trim())
            .map(Self::from_bytes)
            .map_err(|e| ParcelError::InvalidKey(format!("base64 decode: {e}")))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bit_size(&self) -> usize {
        self.bytes.len() * 8
    }

    /// Lowercase hex encoding of the key bytes
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.len() == other.bytes.len() && bool::from(self.bytes.ct_eq(&other.bytes))
    }
}

impl Eq for SymmetricKey {}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bits", &self.bit_size())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random key of `bits` bits.
pub fn generate_key(bits: usize) -> ParcelResult<SymmetricKey> {
    if bits == 0 || bits % 8 != 0 {
        return Err(ParcelError::InvalidArgument(format!(
            "key size must be a positive multiple of 8 bits, got {bits}"
        )));
    }
    let mut bytes = vec![0u8; bits / 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    Ok(SymmetricKey::from_bytes(bytes))
}

/// Generate `len` random IV bytes.
pub fn generate_iv(len: usize) -> Vec<u8> {
    let mut iv = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

pub fn make_private_data_key() -> ParcelResult<SymmetricKey> {
    generate_key(PRIVATE_DATA_KEY_BITS)
}

pub fn make_message_key() -> ParcelResult<SymmetricKey> {
    generate_key(MESSAGE_KEY_BITS)
}

/// Derive the login key of `address` from the master key.
pub fn make_login_key(address: &str, master: &MasterKey) -> ParcelResult<SymmetricKey> {
    KeyHierarchy::new().login_key(master, address, LOGIN_KEY_BITS)
}
