//! parcel-crypto: streaming decryption for stored messages and attachments
//!
//! Architecture: one AES-256/GCM envelope per attachment stream, decrypted
//! incrementally and split into per-attachment blobs.
//!
//! Pipeline: ciphertext → `SizeLimitingFilter` (optional) → `DecryptingFilter`
//! → `GzipDecompressingFilter` (optional) → `HashVerifyingFilter` (optional)
//! → `AttachmentSplitter` → per-attachment `HashVerifyingFilter` → caller sink
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, random, exported as 16 Luhn-checked digit blocks)
//!   ├── Login Key (HKDF-Expand-SHA512, info="login^<address>", 512-bit)
//!   ├── Private Data Key (HKDF-Expand-SHA512, info="privatedata", 256-bit)
//!   └── Message Keys (256-bit, random or info="message^<id>")
//!         ├── Content: AES-256/GCM, IV="content", one-shot
//!         └── Attachments: AES-256/GCM, IV="attachments", streamed
//! ```

pub mod aead;
pub mod cryptor;
pub mod decrypting;
pub mod filter;
pub mod gzip;
pub mod hash;
pub mod hash_verifying;
pub mod kdf;
pub mod keys;
pub mod master_key;
pub mod pipeline;
pub mod splitter;

pub use aead::{AeadMode, AeadSuite, Aes256GcmMode, Direction};
pub use cryptor::{PrependIv, SymmetricCryptor, ATTACHMENTS_IV, CONTENT_IV};
pub use decrypting::DecryptingFilter;
pub use filter::{Filter, FilterChain, NullFilter, NullSink, SizeLimitingFilter, Sink, WriterSink};
pub use gzip::GzipDecompressingFilter;
pub use hash::{Hasher, Sha512Hasher};
pub use hash_verifying::HashVerifyingFilter;
pub use kdf::{expand, HkdfSha512, KeyExpander, KeyHierarchy};
pub use keys::{
    generate_iv, generate_key, make_login_key, make_message_key, make_private_data_key, SymmetricKey,
};
pub use master_key::MasterKey;
pub use pipeline::{decrypt_attachments, AttachmentPipeline, PipelineOptions};
pub use splitter::{AttachmentSplitter, AttachmentStreamFactory, ManifestSource, VerifiedStreamFactory};

pub use parcel_core::{ParcelError, ParcelResult};

/// Size of a master key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a randomly generated GCM IV (96-bit)
pub const RANDOM_IV_SIZE: usize = 12;

/// Smallest key accepted as HKDF input (128-bit)
pub const MIN_KDF_INPUT_BITS: usize = 128;
