//! SHA-2 helpers
//!
//! Digests of attachments and other content are SHA-512; SHA-256 is used for
//! short identifiers.

use std::io::Read;

use sha2::{Digest, Sha256, Sha512};

use parcel_core::ParcelResult;

const READ_BUF_SIZE: usize = 64 * 1024;

/// One-shot digest functions
pub struct Hasher;

impl Hasher {
    pub fn sha256(data: &[u8]) -> [u8; 32] {
        Sha256::digest(data).into()
    }

    pub fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Self::sha256(data))
    }

    pub fn sha512(data: &[u8]) -> [u8; 64] {
        let mut out = [0u8; 64];
        out.copy_from_slice(&Sha512::digest(data));
        out
    }

    pub fn sha512_hex(data: &[u8]) -> String {
        hex::encode(Self::sha512(data))
    }

    /// SHA-512 of everything `reader` yields, hex encoded.
    pub fn sha512_hex_reader<R: Read>(mut reader: R) -> ParcelResult<String> {
        let mut hasher = Sha512Hasher::new();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize_hex())
    }

    /// First 8 bytes of SHA-256 as a big-endian signed integer.
    /// Not for cryptographic use.
    pub fn eight_byte_hash(data: &[u8]) -> i64 {
        let digest = Self::sha256(data);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(head)
    }
}

/// Incremental SHA-512
#[derive(Clone, Default)]
pub struct Sha512Hasher {
    inner: Sha512,
}

impl Sha512Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out.copy_from_slice(&self.inner.finalize());
        out
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.finalize())
    }
}
