//! parcel-core: types shared by the parcel crates
//!
//! - `error`: the error taxonomy every pipeline stage reports through
//! - `config`: `parcel.toml` schema with defaults
//! - `types`: attachment manifests as supplied by the metadata store

pub mod config;
pub mod error;
pub mod types;

pub use config::{ParcelConfig, ReleasePolicy};
pub use error::{AeadError, ParcelError, ParcelResult};
pub use types::{AttachmentEntry, AttachmentManifest, MessageId};
