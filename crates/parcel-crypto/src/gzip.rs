//! Gzip decompression stage
//!
//! Attachment blobs are gzipped before encryption, so the decrypted stream
//! has to be inflated before it can be split.

use std::io::Write;

use flate2::write::GzDecoder;

use parcel_core::{ParcelError, ParcelResult};

use crate::filter::{Filter, Sink};

/// Inflates a gzip stream on its way to the sink.
///
/// The decoder keeps some output buffered between writes. `close()` drains it
/// and checks the gzip trailer. A filter that never saw a byte closes
/// without output.
pub struct GzipDecompressingFilter {
    decoder: GzDecoder<Vec<u8>>,
    seen_input: bool,
}

impl GzipDecompressingFilter {
    pub fn new() -> Self {
        Self {
            decoder: GzDecoder::new(Vec::new()),
            seen_input: false,
        }
    }

    fn drain(&mut self, sink: &mut dyn Sink) -> ParcelResult<()> {
        let out = std::mem::take(self.decoder.get_mut());
        if out.is_empty() {
            return Ok(());
        }
        sink.write(&out)
    }
}

impl Default for GzipDecompressingFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for GzipDecompressingFilter {
    fn write(&mut self, sink: &mut dyn Sink, data: &[u8]) -> ParcelResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.seen_input = true;
        self.decoder.write_all(data).map_err(|e| {
            tracing::warn!(error = %e, "gzip stream rejected");
            ParcelError::Decompression(e.to_string())
        })?;
        self.drain(sink)
    }

    fn close(&mut self, sink: &mut dyn Sink) -> ParcelResult<()> {
        if !self.seen_input {
            return Ok(());
        }
        self.decoder
            .try_finish()
            .map_err(|e| ParcelError::Decompression(e.to_string()))?;
        self.drain(sink)
    }
}

impl std::fmt::Debug for GzipDecompressingFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipDecompressingFilter")
            .field("seen_input", &self.seen_input)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterChain, NullSink};
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn inflate(chunks: &[&[u8]]) -> ParcelResult<Vec<u8>> {
        let mut chain = FilterChain::new(Vec::new())
            .with_filter(GzipDecompressingFilter::new())
            .unwrap();
        for chunk in chunks {
            chain.write(chunk)?;
        }
        chain.close()?;
        Ok(chain.into_inner())
    }

    #[test]
    fn test_hello_world() {
        let gz = gzip(b"Hello, world!");
        assert_eq!(inflate(&[&gz[..]]).unwrap(), b"Hello, world!");
    }

    #[test]
    fn test_hello_world_in_two_writes() {
        let gz = gzip(b"Hello, world!");
        assert_eq!(inflate(&[&gz[..5], &gz[5..]]).unwrap(), b"Hello, world!");
    }

    #[test]
    fn test_compressed_empty_data() {
        let gz = gzip(b"");
        assert!(inflate(&[&gz[..]]).unwrap().is_empty());
    }

    #[test]
    fn test_no_input_gives_no_output() {
        assert!(inflate(&[]).unwrap().is_empty());
        assert!(inflate(&[&b""[..]]).unwrap().is_empty());
    }

    #[test]
    fn test_byte_by_byte_large_input() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let gz = gzip(&data);
        let chunks: Vec<&[u8]> = gz.chunks(1).collect();
        assert_eq!(inflate(&chunks).unwrap(), data);
    }

    #[test]
    fn test_invalid_data() {
        let mut chain = FilterChain::new(NullSink)
            .with_filter(GzipDecompressingFilter::new())
            .unwrap();
        let result = chain
            .write(b"this is plainly not a gzip stream")
            .and_then(|_| chain.close());
        assert!(matches!(result, Err(ParcelError::Decompression(_))));
    }

    #[test]
    fn test_truncated_stream() {
        let gz = gzip(b"some attachment content");
        let result = inflate(&[&gz[..gz.len() - 4]]);
        assert!(matches!(result, Err(ParcelError::Decompression(_))));
    }
}
