//! Sinks, filters and filter chains
//!
//! A `Sink` consumes bytes. A `Filter` transforms bytes on their way to a
//! downstream sink and may hold some back until `close()`. A `FilterChain`
//! strings filters in front of a final sink and is itself a sink, so chains
//! nest.
//!
//! All stages are single-use: once a chain has been closed, or any stage has
//! failed, every further call returns `StreamClosed`.

use std::io::Write;

use parcel_core::{ParcelError, ParcelResult};

pub trait Sink {
    fn write(&mut self, data: &[u8]) -> ParcelResult<()>;

    fn close(&mut self) -> ParcelResult<()> {
        Ok(())
    }
}

pub trait Filter {
    fn write(&mut self, sink: &mut dyn Sink, data: &[u8]) -> ParcelResult<()>;

    /// Flush held-back output into `sink`. Closing `sink` is up to the caller.
    fn close(&mut self, sink: &mut dyn Sink) -> ParcelResult<()>;
}

impl Sink for Vec<u8> {
    fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
        (**self).write(data)
    }

    fn close(&mut self) -> ParcelResult<()> {
        (**self).close()
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
        (**self).write(data)
    }

    fn close(&mut self) -> ParcelResult<()> {
        (**self).close()
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn write(&mut self, _data: &[u8]) -> ParcelResult<()> {
        Ok(())
    }
}

/// Adapts any `io::Write`. `close()` flushes.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for WriterSink<W> {
    fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn close(&mut self) -> ParcelResult<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Passes bytes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFilter;

impl Filter for NullFilter {
    fn write(&mut self, sink: &mut dyn Sink, data: &[u8]) -> ParcelResult<()> {
        sink.write(data)
    }

    fn close(&mut self, _sink: &mut dyn Sink) -> ParcelResult<()> {
        Ok(())
    }
}

/// Fails once more than `limit` bytes have passed through.
#[derive(Debug, Clone)]
pub struct SizeLimitingFilter {
    limit: u64,
    written: u64,
}

impl SizeLimitingFilter {
    pub fn new(limit: u64) -> Self {
        Self { limit, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Filter for SizeLimitingFilter {
    fn write(&mut self, sink: &mut dyn Sink, data: &[u8]) -> ParcelResult<()> {
        self.written = self.written.saturating_add(data.len() as u64);
        if self.written > self.limit {
            tracing::warn!(written = self.written, limit = self.limit, "size limit exceeded");
            return Err(ParcelError::SizeLimitExceeded {
                written: self.written,
                limit: self.limit,
            });
        }
        sink.write(data)
    }

    fn close(&mut self, _sink: &mut dyn Sink) -> ParcelResult<()> {
        Ok(())
    }
}

/// The stages behind one filter: the remaining filters, then the sink.
struct Downstream<'a> {
    filters: &'a mut [Box<dyn Filter>],
    sink: &'a mut dyn Sink,
}

impl Sink for Downstream<'_> {
    fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
        match self.filters.split_first_mut() {
            Some((first, rest)) => first.write(
                &mut Downstream {
                    filters: rest,
                    sink: &mut *self.sink,
                },
                data,
            ),
            None => self.sink.write(data),
        }
    }

    fn close(&mut self) -> ParcelResult<()> {
        match self.filters.split_first_mut() {
            Some((first, rest)) => {
                let mut rest = Downstream {
                    filters: rest,
                    sink: &mut *self.sink,
                };
                first.close(&mut rest)?;
                rest.close()
            }
            None => self.sink.close(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    Open,
    Closed,
    Failed,
}

/// Filters in front of a sink.
///
/// `close()` closes the first filter, then the rest in order, then the sink,
/// so every stage can flush into the next one.
pub struct FilterChain<S: Sink = Box<dyn Sink>> {
    filters: Vec<Box<dyn Filter>>,
    sink: S,
    state: ChainState,
    data_written: bool,
}

impl<S: Sink> FilterChain<S> {
    pub fn new(sink: S) -> Self {
        Self {
            filters: Vec::new(),
            sink,
            state: ChainState::Open,
            data_written: false,
        }
    }

    /// Put `filter` in front of the chain: it sees the data before every
    /// filter pushed earlier. Only allowed before the first write.
    pub fn push_filter(&mut self, filter: impl Filter + 'static) -> ParcelResult<()> {
        if self.data_written || self.state != ChainState::Open {
            return Err(ParcelError::InvalidArgument(
                "filters must be pushed before data is written".into(),
            ));
        }
        self.filters.insert(0, Box::new(filter));
        Ok(())
    }

    /// Builder form of `push_filter`.
    pub fn with_filter(mut self, filter: impl Filter + 'static) -> ParcelResult<Self> {
        self.push_filter(filter)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state != ChainState::Open
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_inner(self) -> S {
        self.sink
    }

    fn downstream(&mut self) -> Downstream<'_> {
        Downstream {
            filters: &mut self.filters,
            sink: &mut self.sink,
        }
    }
}

impl<S: Sink> Sink for FilterChain<S> {
    fn write(&mut self, data: &[u8]) -> ParcelResult<()> {
        if self.state != ChainState::Open {
            return Err(ParcelError::StreamClosed);
        }
        self.data_written = true;
        let result = self.downstream().write(data);
        if result.is_err() {
            self.state = ChainState::Failed;
        }
        result
    }

    fn close(&mut self) -> ParcelResult<()> {
        if self.state != ChainState::Open {
            return Err(ParcelError::StreamClosed);
        }
        let result = self.downstream().close();
        self.state = if result.is_ok() {
            ChainState::Closed
        } else {
            ChainState::Failed
        };
        result
    }
}

impl<S: Sink> std::fmt::Debug for FilterChain<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .field("state", &self.state)
            .finish()
    }
}
