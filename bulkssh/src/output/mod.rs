//! Output fan-out for captured session bytes.
//!
//! A session writes everything it reads into an [`OutputMultiplexer`], which
//! forwards each write, unchanged and synchronously, to every registered
//! [`Sink`] in registration order.

mod sink;
mod template;

pub use sink::{ConsoleSink, FileSink, SharedBuffer};
pub use template::{expand_template, render_template};

use std::fmt;
use std::io;

/// Destination for a stream of output bytes.
pub trait Sink: Send {
    /// Accept one chunk of output.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push buffered data to the underlying medium.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Identity of a registered sink.
///
/// Removal goes by this handle, never by comparing sinks, so two equal
/// sinks stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Ordered set of sinks that all receive the same bytes.
#[derive(Default)]
pub struct OutputMultiplexer {
    sinks: Vec<(SinkId, Box<dyn Sink>)>,
    next_id: u64,
}

impl OutputMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink after all existing ones.
    pub fn add(&mut self, sink: impl Sink + 'static) -> SinkId {
        self.add_boxed(Box::new(sink))
    }

    /// Register an already boxed sink.
    pub fn add_boxed(&mut self, sink: Box<dyn Sink>) -> SinkId {
        let id = SinkId(self.next_id);
        self.next_id += 1;
        self.sinks.push((id, sink));
        id
    }

    /// Deregister a sink and hand it back so the caller can close it.
    pub fn remove(&mut self, id: SinkId) -> Option<Box<dyn Sink>> {
        let pos = self.sinks.iter().position(|(sid, _)| *sid == id)?;
        Some(self.sinks.remove(pos).1)
    }

    /// Forward `data` to every sink in registration order.
    ///
    /// With no sinks registered this is a no-op. The first sink error is
    /// returned as is; sinks after it do not see this chunk.
    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        for (_, sink) in &mut self.sinks {
            sink.write(data)?;
        }
        Ok(())
    }

    /// Flush every sink, returning the first error after trying them all.
    pub fn flush(&mut self) -> io::Result<()> {
        let mut first_err = None;
        for (_, sink) in &mut self.sinks {
            if let Err(e) = sink.flush() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl fmt::Debug for OutputMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputMultiplexer")
            .field(
                "sinks",
                &self.sinks.iter().map(|(id, _)| id).collect::<Vec<_>>(),
            )
            .finish()
    }
}
