//! Splitting one decrypted attachment stream into its attachments
//!
//! All attachments of a message are encrypted as a single stream. The
//! manifest lists them in stream order with their sizes, and the splitter
//! hands each attachment's bytes to its own sink. Sizes that do not add up
//! to the stream length are reported as database integrity errors.

use std::collections::VecDeque;

use parcel_core::{AttachmentEntry, AttachmentManifest, MessageId, ParcelError, ParcelResult};

use crate::filter::{FilterChain, Sink};
use crate::hash_verifying::HashVerifyingFilter;

/// Where attachment manifests come from (normally the message database).
pub trait ManifestSource {
    fn attachments_for_message(&self, message_id: MessageId) -> ParcelResult<AttachmentManifest>;
}

impl ManifestSource for AttachmentManifest {
    fn attachments_for_message(&self, message_id: MessageId) -> ParcelResult<AttachmentManifest> {
        if self.message_id != message_id {
            return Err(ParcelError::DatabaseIntegrity(format!(
                "no attachments recorded for message {message_id}"
            )));
        }
        Ok(self.clone())
    }
}

/// Opens the destination of one attachment.
pub trait AttachmentStreamFactory {
    fn make_stream(
        &mut self,
        message_id: MessageId,
        entry: &AttachmentEntry,
    ) -> ParcelResult<Box<dyn Sink>>;
}

/// Puts a SHA-512 check for the entry's hash in front of every sink opened
/// by `open`.
pub struct VerifiedStreamFactory<F> {
    open: F,
}

impl<F> VerifiedStreamFactory<F>
where
    F: FnMut(MessageId, &AttachmentEntry) -> ParcelResult<Box<dyn Sink>>,
{
    pub fn new(open: F) -> Self {
        Self { open }
    }
}

impl<F> AttachmentStreamFactory for VerifiedStreamFactory<F>
where
    F: FnMut(MessageId, &AttachmentEntry) -> ParcelResult<Box<dyn Sink>>,
{
    fn make_stream(
        &mut self,
        message_id: MessageId,
        entry: &AttachmentEntry,
    ) -> ParcelResult<Box<dyn Sink>> {
        let expected = entry.expected_hash()?;
        let sink = (self.open)(message_id, entry)?;
        let chain = FilterChain::new(sink).with_filter(HashVerifyingFilter::new(expected))?;
        Ok(Box::new(chain))
    }
}

struct OpenStream {
    index: u64,
    sink: Box<dyn Sink>,
    remaining: u64,
}

/// Terminal sink that demultiplexes the decrypted stream of one message.
pub struct AttachmentSplitter<F: AttachmentStreamFactory> {
    message_id: MessageId,
    factory: F,
    pending: VecDeque<AttachmentEntry>,
    current: Option<OpenStream>,
    closed: bool,
}

impl<F: AttachmentStreamFactory> AttachmentSplitter<F> {
    /// Fetch the manifest of `message_id` once and split according to it.
    pub fn new(
        message_id: MessageId,
        source: &impl ManifestSource,
        factory: F,
    ) -> ParcelResult<Self> {
        let manifest = source.attachments_for_message(message_id)?;
        Ok(Self::from_manifest(manifest, factory))
    }

    pub fn from_manifest(manifest: AttachmentManifest, factory: F) -> Self {
        tracing::debug!(
            message_id = manifest.message_id,
            attachments = manifest.len(),
            total_size = manifest.total_size(),
            "splitting attachment stream"
        );
        Self {
            message_id: manifest.message_id,
            factory,
            pending: manifest.attachments.into(),
            current: None,
            closed: false,
        }
    }

    /// Bytes still expected before the stream may end, saturating at
    /// `u64::MAX`
    pub fn bytes_remaining(&self) -> u64 {
        self.pending
            .iter()
            .fold(self.current.as_ref().map_or(0, |c| c.remaining), |total, e| {
                total.saturating_add(e.size)
            })
    }

    fn open(&mut self, entry: &AttachmentEntry) -> ParcelResult<Box<dyn Sink>> {
        tracing::debug!(
            message_id = self.message_id,
            index = entry.index,
            size = entry.size,
            "opening attachment"
        );
        self.factory.make_stream(self.message_id, entry)
    }

    /// Open the next non-empty attachment, closing empty ones on the way.
    fn open_next(&mut self) -> ParcelResult<()> {
        loop {
            let entry = self
                .pending
                .pop_front()
                .ok_or_else(|| ParcelError::DatabaseIntegrity("stream is too long".into()))?;
            let mut sink = self.open(&entry)?;
            if entry.size == 0 {
                sink.close()?;
                continue;
            }
            self.current = Some(OpenStream {
                index: entry.index,
                sink,
                remaining: entry.size,
            });
            return Ok(());
        }
    }

    fn write_inner(&mut self, mut data: &[u8]) -> ParcelResult<()> {
        while !data.is_empty() {
            if self.current.is_none() {
                self.open_next()?;
            }
            let Some(current) = self.current.as_mut() else {
                break;
            };
            let n = data.len().min(usize::try_from(current.remaining).unwrap_or(usize::MAX));
            current.sink.write(&data[..n])?;
            current.remaining -= n as u64;
            data = &data[n..];

            if current.remaining == 0 {
                if let Some(mut done) = self.current.take() {
                    tracing::debug!(index = done.index, "attachment complete");
                    done.sink.close()?;
                }
            }
        }
        Ok(())
    }

    fn close_inner(&mut self) -> ParcelResult<()> {
        if self.current.is_some() || self.pending.iter().any(|e| e.size > 0) {
            // the partial attachment is dropped unclosed
            let remaining = self.bytes_remaining();
            self.current = None;
            tracing::warn!(message_id = self.message_id, remaining, "attachment stream ended early");
            return Err(ParcelError::DatabaseIntegrity("stream is too short".into()));
        }
        while let Some(entry) = self.pending.pop_front() {
            let mut sink = self.open(&entry)?;
            sink.close()?;
        }
        Ok(())
    }
}

impl<F: AttachmentStreamFactory> Sink for AttachmentSplitter<F> {
    fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
        if self.closed {
            return Err(ParcelError::StreamClosed);
        }
        let result = self.write_inner(data);
        if result.is_err() {
            self.closed = true;
        }
        result
    }

    fn close(&mut self) -> ParcelResult<()> {
        if self.closed {
            return Err(ParcelError::StreamClosed);
        }
        self.closed = true;
        self.close_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hasher;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Default, Clone, PartialEq, Eq)]
    struct Recorded {
        index: u64,
        data: Vec<u8>,
        closed: bool,
    }

    type Log = Rc<RefCell<Vec<Recorded>>>;

    struct RecordingSink {
        slot: usize,
        log: Log,
    }

    impl Sink for RecordingSink {
        fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
            self.log.borrow_mut()[self.slot].data.extend_from_slice(data);
            Ok(())
        }

        fn close(&mut self) -> ParcelResult<()> {
            self.log.borrow_mut()[self.slot].closed = true;
            Ok(())
        }
    }

    struct RecordingFactory {
        log: Log,
    }

    impl AttachmentStreamFactory for RecordingFactory {
        fn make_stream(
            &mut self,
            _message_id: MessageId,
            entry: &AttachmentEntry,
        ) -> ParcelResult<Box<dyn Sink>> {
            let mut log = self.log.borrow_mut();
            log.push(Recorded {
                index: entry.index,
                ..Default::default()
            });
            Ok(Box::new(RecordingSink {
                slot: log.len() - 1,
                log: self.log.clone(),
            }))
        }
    }

    fn manifest(sizes: &[u64]) -> AttachmentManifest {
        let entries = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| AttachmentEntry::new(i as u64, *size, &[]))
            .collect();
        AttachmentManifest::new(1, entries)
    }

    fn make_splitter(sizes: &[u64]) -> (AttachmentSplitter<RecordingFactory>, Log) {
        let log: Log = Rc::default();
        let factory = RecordingFactory { log: log.clone() };
        (AttachmentSplitter::from_manifest(manifest(sizes), factory), log)
    }

    fn is_db_error(result: &ParcelResult<()>, message: &str) -> bool {
        matches!(result, Err(ParcelError::DatabaseIntegrity(m)) if m == message)
    }

    #[test]
    fn test_exact_length_split() {
        for chunk_size in [1, 3, 8] {
            let (mut splitter, log) = make_splitter(&[5, 0, 3]);
            for chunk in b"abcdefgh".chunks(chunk_size) {
                splitter.write(chunk).unwrap();
            }
            splitter.close().unwrap();

            let log = log.borrow();
            assert_eq!(log.len(), 3, "chunk size {chunk_size}");
            assert_eq!(log[0].data, b"abcde");
            assert!(log[1].data.is_empty());
            assert_eq!(log[2].data, b"fgh");
            assert!(log.iter().all(|r| r.closed));
            assert_eq!(log.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_stream_too_long() {
        let (mut splitter, log) = make_splitter(&[5, 0, 3]);
        let result = splitter.write(b"abcdefghi");
        assert!(is_db_error(&result, "stream is too long"));
        assert_eq!(log.borrow().len(), 3);
        assert!(matches!(splitter.close(), Err(ParcelError::StreamClosed)));
    }

    #[test]
    fn test_oversized_manifest_reports_short_stream() {
        let (mut splitter, log) = make_splitter(&[u64::MAX, 2]);
        assert_eq!(splitter.bytes_remaining(), u64::MAX);
        splitter.write(b"x").unwrap();
        assert_eq!(splitter.bytes_remaining(), u64::MAX);
        let result = splitter.close();
        assert!(is_db_error(&result, "stream is too short"));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_stream_too_short_leaves_partial_unclosed() {
        let (mut splitter, log) = make_splitter(&[5, 0, 3]);
        splitter.write(b"abcdefg").unwrap();
        assert_eq!(splitter.bytes_remaining(), 1);
        let result = splitter.close();
        assert!(is_db_error(&result, "stream is too short"));

        let log = log.borrow();
        assert!(log[0].closed && log[1].closed);
        assert_eq!(log[2].data, b"fg");
        assert!(!log[2].closed);
    }

    #[test]
    fn test_unopened_attachment_is_too_short() {
        let (mut splitter, log) = make_splitter(&[2, 4]);
        splitter.write(b"ab").unwrap();
        assert!(is_db_error(&splitter.close(), "stream is too short"));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_no_attachments() {
        let (mut splitter, log) = make_splitter(&[]);
        splitter.close().unwrap();
        assert!(log.borrow().is_empty());

        let (mut splitter, _) = make_splitter(&[]);
        assert!(is_db_error(&splitter.write(b"x"), "stream is too long"));
    }

    #[test]
    fn test_trailing_empty_attachments_opened_on_close() {
        let (mut splitter, log) = make_splitter(&[0]);
        splitter.close().unwrap();
        assert_eq!(
            *log.borrow(),
            vec![Recorded {
                index: 0,
                data: Vec::new(),
                closed: true
            }]
        );

        let (mut splitter, log) = make_splitter(&[2, 0, 0]);
        splitter.write(b"xy").unwrap();
        assert_eq!(log.borrow().len(), 1);
        splitter.close().unwrap();
        assert_eq!(log.borrow().len(), 3);
        assert!(log.borrow().iter().all(|r| r.closed));
    }

    #[test]
    fn test_manifest_source_lookup() {
        let log: Log = Rc::default();
        let source = manifest(&[1]);
        assert!(AttachmentSplitter::new(1, &source, RecordingFactory { log: log.clone() }).is_ok());
        assert!(matches!(
            AttachmentSplitter::new(2, &source, RecordingFactory { log }),
            Err(ParcelError::DatabaseIntegrity(_))
        ));
    }

    #[test]
    fn test_verified_streams_check_each_hash() {
        let data: Vec<u8> = (0..100u8).collect();
        let entries = vec![
            AttachmentEntry::new(0, 60, &Hasher::sha512(&data[..60])),
            AttachmentEntry::new(1, 40, &Hasher::sha512(b"something else")),
        ];
        let outputs: Rc<RefCell<Vec<Vec<u8>>>> = Rc::default();
        let sinks = outputs.clone();
        let factory = VerifiedStreamFactory::new(move |_, _: &AttachmentEntry| {
            sinks.borrow_mut().push(Vec::new());
            let slot = sinks.borrow().len() - 1;
            Ok(Box::new(SlotSink {
                slot,
                outputs: sinks.clone(),
            }) as Box<dyn Sink>)
        });
        let mut splitter = AttachmentSplitter::from_manifest(AttachmentManifest::new(9, entries), factory);

        splitter.write(&data[..60]).unwrap();
        splitter.write(&data[60..99]).unwrap();
        let err = splitter.write(&data[99..]).unwrap_err();
        assert!(matches!(err, ParcelError::HashMismatch { .. }));
        assert_eq!(outputs.borrow()[0], &data[..60]);
    }

    struct SlotSink {
        slot: usize,
        outputs: Rc<RefCell<Vec<Vec<u8>>>>,
    }

    impl Sink for SlotSink {
        fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
            self.outputs.borrow_mut()[self.slot].extend_from_slice(data);
            Ok(())
        }
    }
}
