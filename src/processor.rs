//! The request processor, and the transport/protocol factories a
//! [`Worker`](crate::worker::Worker) uses to wrap a frame's bytes for it.
//!
//! All three are opaque collaborators from the core's point of view: the
//! core only invokes them. This module's job is to define the seam, not the
//! implementation — `EchoProcessor` below exists so the crate is runnable
//! end to end without a caller supplying their own.

use std::io::{self, Cursor, Read, Write};

/// Decodes one frame's payload and writes a response, or fails.
///
/// Implementations must tolerate concurrent invocation: frames from the same
/// connection may be dispatched to different workers and processed in any
/// order (see the worker pool's ordering guarantee, or lack thereof).
pub trait Processor: Send + Sync {
    /// Process one decoded request, writing a response to `output`.
    fn process(&self, input: &mut dyn Read, output: &mut dyn Write) -> io::Result<()>;
}

/// Wraps a connection's raw byte sink in whatever output transport the
/// processor expects (compression, additional framing, etc). The default
/// impl is a passthrough.
pub trait TransportFactory: Send + Sync {
    /// Wraps `sink` for the duration of one frame's processing.
    fn get_transport<'a>(&self, sink: &'a mut dyn Write) -> Box<dyn Write + 'a>;
}

/// Wraps a frame payload (or an output transport) in whatever protocol
/// encoding the processor expects. The default impl is a passthrough.
pub trait ProtocolFactory: Send + Sync {
    /// Wraps a read-side transport in a protocol decoder.
    fn get_input_protocol<'a>(&self, transport: &'a mut dyn Read) -> Box<dyn Read + 'a>;
    /// Wraps a write-side transport in a protocol encoder.
    fn get_output_protocol<'a>(&self, transport: &'a mut dyn Write) -> Box<dyn Write + 'a>;
}

/// The default factory pair: no transport or protocol wrapping at all, the
/// frame payload and connection writer are handed to the processor as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughFactory;

impl TransportFactory for PassthroughFactory {
    fn get_transport<'a>(&self, sink: &'a mut dyn Write) -> Box<dyn Write + 'a> {
        Box::new(sink)
    }
}

impl ProtocolFactory for PassthroughFactory {
    fn get_input_protocol<'a>(&self, transport: &'a mut dyn Read) -> Box<dyn Read + 'a> {
        Box::new(transport)
    }

    fn get_output_protocol<'a>(&self, transport: &'a mut dyn Write) -> Box<dyn Write + 'a> {
        Box::new(transport)
    }
}

/// A `Processor` that copies its input straight to its output, unchanged.
///
/// Used by the demo binaries and integration tests; not intended as a
/// production request handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoProcessor;

impl Processor for EchoProcessor {
    fn process(&self, input: &mut dyn Read, output: &mut dyn Write) -> io::Result<()> {
        io::copy(input, output)?;
        Ok(())
    }
}

/// Reads a frame payload already resident in memory; handed to the input
/// protocol as the innermost transport.
pub fn frame_reader(payload: bytes::Bytes) -> Cursor<bytes::Bytes> {
    Cursor::new(payload)
}
