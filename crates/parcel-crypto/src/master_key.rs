//! The account master key and its human-transcribable text form
//!
//! The 256-bit key is shown to the user as 16 blocks of 6 digits. Each block
//! is a 5-digit big-endian `u16` followed by a Luhn mod-10 check digit, so
//! typos are caught per block while the user types the key back in:
//!
//! ```text
//! -----BEGIN PARCEL PRIVATE MASTER KEY-----
//! Version: 1 (256 bit)
//!
//! 009167 186544 520379 167502
//! 092114 170530 357103 015669
//! 422915 084699 505677 309062
//! 407924 293407 624445 483701
//! -----END PARCEL PRIVATE MASTER KEY-----
//! ```

use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use parcel_core::{ParcelError, ParcelResult};

use crate::keys::{generate_key, SymmetricKey, MASTER_KEY_BITS};
use crate::KEY_SIZE;

const PEM_HEADER: &str = "BEGIN PARCEL PRIVATE MASTER KEY";
const PEM_FOOTER: &str = "END PARCEL PRIVATE MASTER KEY";
const BLOCK_COUNT: usize = 16;
const BLOCK_DIGITS: usize = 6;
const BLOCKS_PER_LINE: usize = 4;
const MAX_BLOCK_VALUE: u32 = 65535;

/// The 256-bit root secret of an account. Zeroized on drop.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
    version: u32,
}

impl MasterKey {
    pub fn from_bytes(bytes: &[u8]) -> ParcelResult<Self> {
        Self::from_bytes_with_version(bytes, 1)
    }

    pub fn from_bytes_with_version(bytes: &[u8], version: u32) -> ParcelResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            ParcelError::InvalidKey(format!(
                "master key must have {} bits, got {}",
                MASTER_KEY_BITS,
                bytes.len() * 8
            ))
        })?;
        Ok(Self { bytes, version })
    }

    /// Parse 16 six-digit blocks.
    pub fn from_blocks<S: AsRef<str>>(blocks: &[S], version: u32) -> ParcelResult<Self> {
        check_blocks(blocks)?;
        let mut bytes = [0u8; KEY_SIZE];
        for (i, block) in blocks.iter().enumerate() {
            // check_blocks guarantees five leading ASCII digits <= 65535
            let value: u16 = block.as_ref()[..BLOCK_DIGITS - 1]
                .parse()
                .map_err(|e| ParcelError::InvalidKey(format!("block {i}: {e}")))?;
            bytes[2 * i..2 * i + 2].copy_from_slice(&value.to_be_bytes());
        }
        Ok(Self { bytes, version })
    }

    /// Parse the armoured text form. Input is user-typed, so stray carriage
    /// returns, tabs and spaces are tolerated.
    pub fn from_pem(pem: &str) -> ParcelResult<Self> {
        let cleaned: String = pem.chars().filter(|c| *c != '\r' && *c != '\t').collect();
        let lines: Vec<&str> = cleaned
            .lines()
            .filter(|line| {
                let marker = line.trim().trim_matches('-');
                marker != PEM_HEADER && marker != PEM_FOOTER
            })
            .collect();
        let text = lines.join("\n");
        let text = text.trim();

        let (header, body) = match text.find("\n\n") {
            Some(pos) => (Some(&text[..pos]), &text[pos + 2..]),
            None => (None, text),
        };

        let mut version = 1;
        if let Some(header) = header {
            for line in header.trim().lines() {
                let line = line.trim();
                let (name, value) = line.split_once(':').ok_or_else(|| {
                    ParcelError::InvalidKey("invalid master key header line: no colon found".into())
                })?;
                if !name.trim().eq_ignore_ascii_case("version") {
                    return Err(ParcelError::InvalidKey(format!(
                        "invalid master key header name: '{}'",
                        name.trim()
                    )));
                }
                version = parse_leading_number(value.trim()).ok_or_else(|| {
                    ParcelError::InvalidKey(format!("invalid master key version: '{}'", value.trim()))
                })?;
            }
        }

        let mut blocks = Vec::with_capacity(BLOCK_COUNT);
        for line in body.lines() {
            let digits: String = line.chars().filter(|c| *c != ' ').collect();
            if digits.is_empty() {
                continue;
            }
            if digits.len() != BLOCK_DIGITS * BLOCKS_PER_LINE || !digits.is_ascii() {
                return Err(ParcelError::InvalidKey(format!(
                    "master key line must hold {BLOCKS_PER_LINE} blocks of {BLOCK_DIGITS} digits: '{}'",
                    line.trim()
                )));
            }
            for i in 0..BLOCKS_PER_LINE {
                blocks.push(digits[i * BLOCK_DIGITS..(i + 1) * BLOCK_DIGITS].to_string());
            }
        }

        Self::from_blocks(&blocks, version)
    }

    pub fn is_valid_pem(pem: &str) -> bool {
        Self::from_pem(pem).is_ok()
    }

    pub fn is_valid_blocks<S: AsRef<str>>(blocks: &[S]) -> bool {
        check_blocks(blocks).is_ok()
    }

    /// Cheap check for a single block while it is being typed.
    pub fn is_plausible_single_block(block: &str) -> bool {
        block.len() == BLOCK_DIGITS
            && block.bytes().all(|b| b.is_ascii_digit())
            && luhn_valid(block)
            && block_in_range(block)
    }

    pub fn make_random() -> ParcelResult<Self> {
        let key = generate_key(MASTER_KEY_BITS)?;
        Self::from_bytes(key.as_bytes())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// The key as HKDF input material
    pub fn to_symmetric_key(&self) -> SymmetricKey {
        SymmetricKey::from_slice(&self.bytes)
    }

    pub fn data_blocks(&self) -> Vec<String> {
        self.bytes
            .chunks_exact(2)
            .map(|pair| {
                let number = format!("{:05}", u16::from_be_bytes([pair[0], pair[1]]));
                let check = luhn_check_digit(&number);
                format!("{number}{check}")
            })
            .collect()
    }

    pub fn to_pem(&self) -> String {
        let blocks = self.data_blocks();
        let mut out = String::new();
        out.push_str(&format!("-----{PEM_HEADER}-----\n"));
        out.push_str(&format!("Version: {} ({} bit)\n", self.version, KEY_SIZE * 8));
        out.push('\n');
        for line in blocks.chunks(BLOCKS_PER_LINE) {
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out.push_str(&format!("-----{PEM_FOOTER}-----\n"));
        out
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version && bool::from(self.bytes.ct_eq(&other.bytes))
    }
}

impl Eq for MasterKey {}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("version", &self.version)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

fn check_blocks<S: AsRef<str>>(blocks: &[S]) -> ParcelResult<()> {
    if blocks.len() != BLOCK_COUNT {
        return Err(ParcelError::InvalidKey(format!(
            "master key must have {BLOCK_COUNT} blocks, got {}",
            blocks.len()
        )));
    }
    for block in blocks {
        let block = block.as_ref();
        if block.len() != BLOCK_DIGITS || !block.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParcelError::InvalidKey(format!(
                "block must be {BLOCK_DIGITS} digits: '{block}'"
            )));
        }
        if !luhn_valid(block) {
            return Err(ParcelError::InvalidKey(format!(
                "block luhn check failed: '{block}'"
            )));
        }
        if !block_in_range(block) {
            return Err(ParcelError::InvalidKey(format!(
                "block value must be at most {MAX_BLOCK_VALUE}: '{block}'"
            )));
        }
    }
    Ok(())
}

fn digit(b: u8) -> u32 {
    u32::from(b - b'0')
}

/// Luhn mod-10 over a digit string that ends with its check digit.
fn luhn_valid(block: &str) -> bool {
    let mut factor = 1;
    let mut sum = 0;
    for b in block.bytes().rev() {
        let addend = factor * digit(b);
        factor = if factor == 2 { 1 } else { 2 };
        sum += addend / 10 + addend % 10;
    }
    sum % 10 == 0
}

/// Check digit to append to `digits` so that the result passes `luhn_valid`.
fn luhn_check_digit(digits: &str) -> u32 {
    let mut factor = 2;
    let mut sum = 0;
    for b in digits.bytes().rev() {
        let x = factor * digit(b);
        factor = if factor == 2 { 1 } else { 2 };
        sum += x / 10 + x % 10;
    }
    (10 - sum % 10) % 10
}

fn block_in_range(block: &str) -> bool {
    block[..BLOCK_DIGITS - 1]
        .parse::<u32>()
        .map(|v| v <= MAX_BLOCK_VALUE)
        .unwrap_or(false)
}

fn parse_leading_number(value: &str) -> Option<u32> {
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value[..end].parse().ok()
}
