//! Streaming AEAD decryption filter
//!
//! The ciphertext arrives through any number of `write()` calls and its last
//! `tag_size` bytes are the authentication tag. Which bytes those are is only
//! known once the stream ends, so the filter always holds back the newest
//! `tag_size` bytes and decrypts everything older than that.

use zeroize::Zeroize;

use parcel_core::{ParcelError, ParcelResult, ReleasePolicy};

use crate::aead::{AeadMode, AeadSuite, Aes256GcmMode, Direction};
use crate::cryptor::ATTACHMENTS_IV;
use crate::filter::{Filter, Sink};
use crate::keys::SymmetricKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Started,
    Finished,
}

pub struct DecryptingFilter<M: AeadMode = Aes256GcmMode> {
    mode: M,
    iv: Vec<u8>,
    policy: ReleasePolicy,
    /// Newest ciphertext bytes, possibly the tag. Never longer than the tag.
    buffer: Vec<u8>,
    /// Plaintext withheld until the tag verifies (authenticated policy only)
    held: Vec<u8>,
    state: State,
}

impl DecryptingFilter<Aes256GcmMode> {
    /// AES-256/GCM under the attachments IV, releasing plaintext as it is
    /// decrypted.
    pub fn new(key: &SymmetricKey) -> ParcelResult<Self> {
        let mode = AeadSuite::Aes256Gcm.mode(key, Direction::Decrypt)?;
        Self::with_mode(mode, ATTACHMENTS_IV)
    }
}

impl<M: AeadMode> DecryptingFilter<M> {
    pub fn with_mode(mode: M, iv: &[u8]) -> ParcelResult<Self> {
        if mode.direction() != Direction::Decrypt {
            return Err(ParcelError::InvalidArgument(
                "DecryptingFilter needs a decrypting cipher mode".into(),
            ));
        }
        if iv.is_empty() {
            return Err(ParcelError::InvalidArgument("IV must not be empty".into()));
        }
        Ok(Self {
            mode,
            iv: iv.to_vec(),
            policy: ReleasePolicy::default(),
            buffer: Vec::new(),
            held: Vec::new(),
            state: State::Idle,
        })
    }

    pub fn with_policy(mut self, policy: ReleasePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ReleasePolicy {
        self.policy
    }

    /// Bytes currently held back as tag candidates
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn release(&mut self, sink: &mut dyn Sink, plaintext: &[u8]) -> ParcelResult<()> {
        if plaintext.is_empty() {
            return Ok(());
        }
        match self.policy {
            ReleasePolicy::Streaming => sink.write(plaintext),
            ReleasePolicy::Authenticated => {
                self.held.extend_from_slice(plaintext);
                Ok(())
            }
        }
    }

    fn fail(&mut self) {
        self.state = State::Finished;
        self.buffer.clear();
        self.held.zeroize();
        self.held.clear();
    }
}

impl<M: AeadMode> Filter for DecryptingFilter<M> {
    fn write(&mut self, sink: &mut dyn Sink, data: &[u8]) -> ParcelResult<()> {
        match self.state {
            State::Finished => return Err(ParcelError::StreamClosed),
            State::Idle => {
                self.mode.start(&self.iv)?;
                self.state = State::Started;
                tracing::debug!(policy = ?self.policy, "decryption started");
            }
            State::Started => {}
        }

        let tag_size = self.mode.tag_size();
        let forwardable = (self.buffer.len() + data.len()).saturating_sub(tag_size);
        if forwardable == 0 {
            self.buffer.extend_from_slice(data);
            return Ok(());
        }

        let from_buffer = forwardable.min(self.buffer.len());
        let from_data = forwardable - from_buffer;
        let mut chunk = Vec::with_capacity(forwardable);
        chunk.extend(self.buffer.drain(..from_buffer));
        chunk.extend_from_slice(&data[..from_data]);
        self.buffer.extend_from_slice(&data[from_data..]);

        if let Err(e) = self.mode.update(&mut chunk) {
            self.fail();
            return Err(ParcelError::integrity("DecryptingFilter::write", e));
        }
        let result = self.release(sink, &chunk);
        if result.is_err() {
            self.fail();
        }
        result
    }

    fn close(&mut self, sink: &mut dyn Sink) -> ParcelResult<()> {
        match self.state {
            State::Finished => return Err(ParcelError::StreamClosed),
            State::Idle => {
                self.state = State::Finished;
                return Ok(());
            }
            State::Started => {}
        }

        let mut tail = std::mem::take(&mut self.buffer);
        if let Err(e) = self.mode.finish(&mut tail) {
            tracing::warn!(error = %e, "attachment stream failed authentication");
            self.fail();
            return Err(ParcelError::integrity("DecryptingFilter::close", e));
        }
        self.state = State::Finished;

        match self.policy {
            ReleasePolicy::Streaming => self.release(sink, &tail)?,
            ReleasePolicy::Authenticated => {
                self.held.extend_from_slice(&tail);
                let held = std::mem::take(&mut self.held);
                if !held.is_empty() {
                    sink.write(&held)?;
                }
            }
        }
        tracing::debug!("decryption finished");
        Ok(())
    }
}

impl<M: AeadMode> std::fmt::Debug for DecryptingFilter<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptingFilter")
            .field("policy", &self.policy)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
