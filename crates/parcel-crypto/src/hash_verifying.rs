//! Pass-through filter that checks the digest of everything it forwards

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

use parcel_core::{ParcelError, ParcelResult};

use crate::filter::{Filter, Sink};

/// Forwards data unchanged and compares its digest with `expected` on close.
/// SHA-512 unless another digest is chosen.
pub struct HashVerifyingFilter<D: Digest = Sha512> {
    hasher: D,
    expected: Vec<u8>,
    closed: bool,
}

impl HashVerifyingFilter<Sha512> {
    pub fn new(expected: impl Into<Vec<u8>>) -> Self {
        Self::with_digest(expected)
    }
}

impl<D: Digest> HashVerifyingFilter<D> {
    pub fn with_digest(expected: impl Into<Vec<u8>>) -> Self {
        Self {
            hasher: D::new(),
            expected: expected.into(),
            closed: false,
        }
    }
}

impl<D: Digest> Filter for HashVerifyingFilter<D> {
    fn write(&mut self, sink: &mut dyn Sink, data: &[u8]) -> ParcelResult<()> {
        if self.closed {
            return Err(ParcelError::StreamClosed);
        }
        Digest::update(&mut self.hasher, data);
        sink.write(data)
    }

    fn close(&mut self, _sink: &mut dyn Sink) -> ParcelResult<()> {
        if self.closed {
            return Err(ParcelError::StreamClosed);
        }
        self.closed = true;
        let actual = std::mem::replace(&mut self.hasher, D::new()).finalize();
        // ct_eq is false for slices of different length
        if !bool::from(actual.as_slice().ct_eq(&self.expected)) {
            let actual = hex::encode(actual);
            tracing::warn!(expected = %hex::encode(&self.expected), %actual, "hash mismatch");
            return Err(ParcelError::HashMismatch {
                expected: hex::encode(&self.expected),
                actual,
            });
        }
        Ok(())
    }
}

impl<D: Digest> std::fmt::Debug for HashVerifyingFilter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashVerifyingFilter")
            .field("expected", &hex::encode(&self.expected))
            .field("closed", &self.closed)
            .finish()
    }
}
