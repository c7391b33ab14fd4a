//! Decrypt-verify-split pipeline for the attachment stream of one message
//!
//! ```text
//! ciphertext → [SizeLimitingFilter] → DecryptingFilter → [GzipDecompressingFilter]
//!            → [HashVerifyingFilter] → AttachmentSplitter
//!            → per attachment: HashVerifyingFilter → sink
//! ```

use std::io::Read;

use parcel_core::config::PipelineConfig;
use parcel_core::{AttachmentManifest, MessageId, ParcelResult, ReleasePolicy};

use crate::decrypting::DecryptingFilter;
use crate::filter::{FilterChain, SizeLimitingFilter, Sink};
use crate::gzip::GzipDecompressingFilter;
use crate::hash_verifying::HashVerifyingFilter;
use crate::keys::SymmetricKey;
use crate::splitter::{AttachmentSplitter, AttachmentStreamFactory, ManifestSource};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineOptions {
    pub release_policy: ReleasePolicy,
    /// Fail once more ciphertext bytes than this arrive
    pub max_attachments_bytes: Option<u64>,
    /// Inflate the decrypted stream before splitting it
    pub gzip: bool,
    /// SHA-512 of the whole plaintext stream, checked at close
    pub stream_hash: Option<Vec<u8>>,
}

impl PipelineOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            release_policy: config.release_policy,
            max_attachments_bytes: config.max_attachments_bytes,
            gzip: config.gzip,
            stream_hash: None,
        }
    }

    pub fn with_stream_hash(mut self, expected: impl Into<Vec<u8>>) -> Self {
        self.stream_hash = Some(expected.into());
        self
    }
}

pub struct AttachmentPipeline<F: AttachmentStreamFactory> {
    chain: FilterChain<AttachmentSplitter<F>>,
    bytes_in: u64,
}

impl<F: AttachmentStreamFactory> AttachmentPipeline<F> {
    pub fn new(
        key: &SymmetricKey,
        splitter: AttachmentSplitter<F>,
        options: &PipelineOptions,
    ) -> ParcelResult<Self> {
        // push_filter prepends, so stages are added from the sink outwards
        let mut chain = FilterChain::new(splitter);
        if let Some(expected) = &options.stream_hash {
            chain.push_filter(HashVerifyingFilter::new(expected.clone()))?;
        }
        if options.gzip {
            chain.push_filter(GzipDecompressingFilter::new())?;
        }
        chain.push_filter(DecryptingFilter::new(key)?.with_policy(options.release_policy))?;
        if let Some(limit) = options.max_attachments_bytes {
            chain.push_filter(SizeLimitingFilter::new(limit))?;
        }

        tracing::debug!(
            stages = chain.len(),
            policy = ?options.release_policy,
            gzip = options.gzip,
            "attachment pipeline ready"
        );
        Ok(Self { chain, bytes_in: 0 })
    }

    pub fn from_manifest(
        key: &SymmetricKey,
        manifest: AttachmentManifest,
        factory: F,
        options: &PipelineOptions,
    ) -> ParcelResult<Self> {
        Self::new(key, AttachmentSplitter::from_manifest(manifest, factory), options)
    }

    pub fn for_message(
        key: &SymmetricKey,
        message_id: MessageId,
        source: &impl ManifestSource,
        factory: F,
        options: &PipelineOptions,
    ) -> ParcelResult<Self> {
        Self::new(key, AttachmentSplitter::new(message_id, source, factory)?, options)
    }

    /// Ciphertext bytes accepted so far
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Feed everything `reader` yields, `buf_size` bytes at a time. Does not
    /// close the pipeline.
    pub fn feed<R: Read>(&mut self, mut reader: R, buf_size: usize) -> ParcelResult<u64> {
        let mut buf = vec![0u8; buf_size.max(1)];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.write(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }

    pub fn into_splitter(self) -> AttachmentSplitter<F> {
        self.chain.into_inner()
    }
}

impl<F: AttachmentStreamFactory> Sink for AttachmentPipeline<F> {
    fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
        self.chain.write(data)?;
        self.bytes_in += data.len() as u64;
        Ok(())
    }

    fn close(&mut self) -> ParcelResult<()> {
        let result = self.chain.close();
        match &result {
            Ok(()) => tracing::debug!(bytes_in = self.bytes_in, "attachment pipeline closed"),
            Err(e) => tracing::warn!(bytes_in = self.bytes_in, error = %e, "attachment pipeline failed"),
        }
        result
    }
}

/// Decrypt a complete attachment stream held in memory.
pub fn decrypt_attachments<F: AttachmentStreamFactory>(
    key: &SymmetricKey,
    ciphertext: &[u8],
    manifest: AttachmentManifest,
    factory: F,
    options: &PipelineOptions,
) -> ParcelResult<()> {
    let mut pipeline = AttachmentPipeline::from_manifest(key, manifest, factory, options)?;
    // an empty block was never encrypted, so there is no tag to check
    if !ciphertext.is_empty() {
        pipeline.write(ciphertext)?;
    }
    pipeline.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cryptor::{PrependIv, SymmetricCryptor, ATTACHMENTS_IV};
    use crate::hash::Hasher;
    use crate::splitter::VerifiedStreamFactory;
    use parcel_core::{AttachmentEntry, ParcelError};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Outputs = Rc<RefCell<Vec<Vec<u8>>>>;

    struct Collect {
        slot: usize,
        outputs: Outputs,
    }

    impl Sink for Collect {
        fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
            self.outputs.borrow_mut()[self.slot].extend_from_slice(data);
            Ok(())
        }
    }

    fn collecting_factory(
        outputs: &Outputs,
    ) -> VerifiedStreamFactory<impl FnMut(MessageId, &AttachmentEntry) -> ParcelResult<Box<dyn Sink>>>
    {
        let outputs = outputs.clone();
        VerifiedStreamFactory::new(move |_, _: &AttachmentEntry| {
            outputs.borrow_mut().push(Vec::new());
            let slot = outputs.borrow().len() - 1;
            Ok(Box::new(Collect {
                slot,
                outputs: outputs.clone(),
            }) as Box<dyn Sink>)
        })
    }

    fn key() -> SymmetricKey {
        SymmetricKey::from_slice(&[0x42; 32])
    }

    fn encrypt(plaintext: &[u8]) -> Vec<u8> {
        SymmetricCryptor::new()
            .encrypt(plaintext, &key(), ATTACHMENTS_IV, PrependIv::DontPrepend)
            .unwrap()
    }

    fn manifest_for(parts: &[&[u8]]) -> AttachmentManifest {
        let entries = parts
            .iter()
            .enumerate()
            .map(|(i, p)| AttachmentEntry::new(i as u64, p.len() as u64, &Hasher::sha512(p)))
            .collect();
        AttachmentManifest::new(3, entries)
    }

    #[test]
    fn test_full_pipeline() {
        let plaintext = b"first attachmentsecond";
        let manifest = manifest_for(&[&plaintext[..16], &b""[..], &plaintext[16..]]);
        let outputs = Outputs::default();
        let options = PipelineOptions::default().with_stream_hash(Hasher::sha512(plaintext));

        let ct = encrypt(plaintext);
        let mut pipeline =
            AttachmentPipeline::from_manifest(&key(), manifest, collecting_factory(&outputs), &options)
                .unwrap();
        let fed = pipeline.feed(ct.as_slice(), 5).unwrap();
        assert_eq!(fed, ct.len() as u64);
        assert_eq!(pipeline.bytes_in(), ct.len() as u64);
        pipeline.close().unwrap();

        assert_eq!(
            *outputs.borrow(),
            vec![b"first attachment".to_vec(), Vec::new(), b"second".to_vec()]
        );
    }

    #[test]
    fn test_wrong_stream_hash() {
        let plaintext = b"payload";
        let options = PipelineOptions::default().with_stream_hash(Hasher::sha512(b"other"));
        let outputs = Outputs::default();
        let err = decrypt_attachments(
            &key(),
            &encrypt(plaintext),
            manifest_for(&[&plaintext[..]]),
            collecting_factory(&outputs),
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, ParcelError::HashMismatch { .. }));
    }

    #[test]
    fn test_size_limit_applies_to_ciphertext() {
        let plaintext = [7u8; 64];
        let run = |limit: u64| {
            let options = PipelineOptions {
                max_attachments_bytes: Some(limit),
                ..Default::default()
            };
            let outputs = Outputs::default();
            decrypt_attachments(
                &key(),
                &encrypt(&plaintext),
                manifest_for(&[&plaintext[..]]),
                collecting_factory(&outputs),
                &options,
            )
        };

        // 64 bytes of plaintext plus the 16-byte tag
        run(80).unwrap();
        assert!(matches!(
            run(79),
            Err(ParcelError::SizeLimitExceeded {
                written: 80,
                limit: 79
            })
        ));
    }

    #[test]
    fn test_size_limit_rejects_before_decrypting() {
        let outputs = Outputs::default();
        let options = PipelineOptions {
            max_attachments_bytes: Some(8),
            release_policy: ReleasePolicy::Streaming,
            ..Default::default()
        };
        let plaintext = [1u8; 40];
        let mut pipeline = AttachmentPipeline::from_manifest(
            &key(),
            manifest_for(&[&plaintext[..]]),
            collecting_factory(&outputs),
            &options,
        )
        .unwrap();
        let err = pipeline.write(&encrypt(&plaintext)).unwrap_err();
        assert!(matches!(err, ParcelError::SizeLimitExceeded { .. }));
        // nothing reached the splitter
        assert!(outputs.borrow().is_empty());
    }

    #[test]
    fn test_gzipped_attachments() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let plaintext = b"first attachmentsecond".repeat(50);
        let mut enc = GzEncoder::new(Vec::new(), Compression::best());
        enc.write_all(&plaintext).unwrap();
        let compressed = enc.finish().unwrap();

        let manifest = manifest_for(&[&plaintext[..700], &plaintext[700..]]);
        let options = PipelineOptions {
            gzip: true,
            ..Default::default()
        }
        .with_stream_hash(Hasher::sha512(&plaintext));
        let outputs = Outputs::default();
        let mut pipeline =
            AttachmentPipeline::from_manifest(&key(), manifest, collecting_factory(&outputs), &options)
                .unwrap();
        pipeline.feed(encrypt(&compressed).as_slice(), 7).unwrap();
        pipeline.close().unwrap();

        assert_eq!(
            *outputs.borrow(),
            vec![plaintext[..700].to_vec(), plaintext[700..].to_vec()]
        );
    }

    #[test]
    fn test_gzip_off_splits_raw_stream() {
        let plaintext = b"not compressed";
        let outputs = Outputs::default();
        decrypt_attachments(
            &key(),
            &encrypt(plaintext),
            manifest_for(&[&plaintext[..]]),
            collecting_factory(&outputs),
            &PipelineOptions::default(),
        )
        .unwrap();
        assert_eq!(*outputs.borrow(), vec![plaintext.to_vec()]);
    }

    #[test]
    fn test_empty_block_with_empty_manifest() {
        let outputs = Outputs::default();
        decrypt_attachments(
            &key(),
            &[],
            manifest_for(&[]),
            collecting_factory(&outputs),
            &PipelineOptions::default(),
        )
        .unwrap();
        assert!(outputs.borrow().is_empty());
    }

    #[test]
    fn test_authenticated_policy_tamper_writes_nothing() {
        let plaintext = [9u8; 40];
        let mut ct = encrypt(&plaintext);
        ct[0] ^= 0xff;
        let options = PipelineOptions {
            release_policy: ReleasePolicy::Authenticated,
            ..Default::default()
        };
        let outputs = Outputs::default();
        let err = decrypt_attachments(
            &key(),
            &ct,
            manifest_for(&[&plaintext[..]]),
            collecting_factory(&outputs),
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, ParcelError::IntegrityFailure { .. }));
        assert!(outputs.borrow().is_empty());
    }

    #[test]
    fn test_options_from_config() {
        let config = PipelineConfig {
            release_policy: ReleasePolicy::Authenticated,
            max_attachments_bytes: Some(5),
            gzip: true,
            io_buffer_size: 16,
        };
        let options = PipelineOptions::from_config(&config);
        assert_eq!(options.release_policy, ReleasePolicy::Authenticated);
        assert_eq!(options.max_attachments_bytes, Some(5));
        assert!(options.gzip);
        assert!(options.stream_hash.is_none());
    }
}
