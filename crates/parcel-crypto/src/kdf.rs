//! HKDF-Expand key hierarchy
//!
//! Sub-keys are derived with the expand step of RFC 5869 only. The input key
//! is used directly as the HMAC-SHA-512 key (no extract step), and the info
//! string separates the domains:
//!
//! - `login^<address>` → login key
//! - `privatedata` → private-data key
//! - `message^<id>` → per-message key

use hmac::{Hmac, Mac};
use sha2::Sha512;

use parcel_core::{MessageId, ParcelError, ParcelResult};

use crate::keys::SymmetricKey;
use crate::master_key::MasterKey;
use crate::MIN_KDF_INPUT_BITS;

type HmacSha512 = Hmac<Sha512>;

/// Output size of HMAC-SHA-512 in bytes
const HASH_LEN: usize = 64;

/// HKDF can produce at most 255 hash blocks.
pub const MAX_OUTPUT_BITS: usize = 255 * HASH_LEN * 8;

/// Expands an input key into `output_len` bytes bound to `info`.
pub trait KeyExpander {
    fn derive(&self, output_len: usize, input_key: &[u8], info: &[u8]) -> ParcelResult<Vec<u8>>;
}

/// HKDF-Expand with HMAC-SHA-512 as PRF
#[derive(Debug, Clone, Copy, Default)]
pub struct HkdfSha512;

impl KeyExpander for HkdfSha512 {
    fn derive(&self, output_len: usize, input_key: &[u8], info: &[u8]) -> ParcelResult<Vec<u8>> {
        if output_len > 255 * HASH_LEN {
            return Err(ParcelError::InvalidArgument(format!(
                "HKDF output of {output_len} bytes exceeds {} bytes",
                255 * HASH_LEN
            )));
        }

        let mut okm = Vec::with_capacity(output_len);
        let mut previous: Vec<u8> = Vec::new();
        let mut counter: u8 = 1;
        while okm.len() < output_len {
            let mut mac = HmacSha512::new_from_slice(input_key)
                .map_err(|e| ParcelError::InvalidKey(format!("HMAC key: {e}")))?;
            mac.update(&previous);
            mac.update(info);
            mac.update(&[counter]);
            previous = mac.finalize().into_bytes().to_vec();

            let take = (output_len - okm.len()).min(HASH_LEN);
            okm.extend_from_slice(&previous[..take]);
            counter = counter.wrapping_add(1);
        }
        Ok(okm)
    }
}

/// Derives domain-separated sub-keys from a root secret.
#[derive(Debug, Clone, Default)]
pub struct KeyHierarchy<E: KeyExpander = HkdfSha512> {
    expander: E,
}

impl KeyHierarchy<HkdfSha512> {
    pub fn new() -> Self {
        Self {
            expander: HkdfSha512,
        }
    }
}

impl<E: KeyExpander> KeyHierarchy<E> {
    pub fn with_expander(expander: E) -> Self {
        Self { expander }
    }

    /// Derive `output_bits` bits from `input` for the context `info`.
    ///
    /// Inputs shorter than 128 bits are rejected before any derivation work.
    /// The output length must be a positive multiple of 8 within the HKDF limit.
    pub fn expand(
        &self,
        input: &SymmetricKey,
        info: &str,
        output_bits: usize,
    ) -> ParcelResult<SymmetricKey> {
        if input.bit_size() < MIN_KDF_INPUT_BITS {
            return Err(ParcelError::InvalidKey(format!(
                "HKDF input key must have at least {MIN_KDF_INPUT_BITS} bits, got {}",
                input.bit_size()
            )));
        }
        if output_bits == 0 || output_bits % 8 != 0 || output_bits > MAX_OUTPUT_BITS {
            return Err(ParcelError::InvalidArgument(format!(
                "output length must be a positive multiple of 8 bits up to {MAX_OUTPUT_BITS}, got {output_bits}"
            )));
        }

        tracing::debug!(info_len = info.len(), output_bits, "expanding key");
        let okm = self
            .expander
            .derive(output_bits / 8, input.as_bytes(), info.as_bytes())?;
        Ok(SymmetricKey::from_bytes(okm))
    }

    pub fn login_key(
        &self,
        master: &MasterKey,
        address: &str,
        bits: usize,
    ) -> ParcelResult<SymmetricKey> {
        self.expand(&master.to_symmetric_key(), &format!("login^{address}"), bits)
    }

    pub fn private_data_key(&self, master: &MasterKey, bits: usize) -> ParcelResult<SymmetricKey> {
        self.expand(&master.to_symmetric_key(), "privatedata", bits)
    }

    pub fn message_key(
        &self,
        master: &MasterKey,
        message_id: MessageId,
        bits: usize,
    ) -> ParcelResult<SymmetricKey> {
        self.expand(&master.to_symmetric_key(), &format!("message^{message_id}"), bits)
    }
}

/// `KeyHierarchy::new().expand(..)`
pub fn expand(input: &SymmetricKey, info: &str, output_bits: usize) -> ParcelResult<SymmetricKey> {
    KeyHierarchy::new().expand(input, info, output_bits)
}
