//! The pull side of the body bridge.
//!
//! The tokenizer pushes body chunks as it recognizes them; callers want to
//! pull the body a chunk at a time, possibly much later. [`BodyStream`] is
//! the meeting point: it owns a single chunk slot that the tokenizer fills
//! and, when the slot is empty, drives the owning parser forward with a
//! plain synchronous call. The call chain
//! `BodyStream::read -> parser pump -> tokenizer feed -> slot fill`
//! is one logical recursive call with O(1) depth, which preserves the
//! ordering guarantees the rest of the engine relies on.
//!
//! The slot never holds more than one transport read's worth of unconsumed
//! bytes: the parser is only pumped while the slot is empty, so peak memory
//! for a streaming body is bounded by the read buffer size, independent of
//! total body size.

use std::cell::RefCell;
use std::cmp;
use std::fmt;
use std::io;
use std::rc::{Rc, Weak};
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use tracing::trace;

use crate::protocol::{HttpError, ParseError};

/// Shared between a [`BodyStream`] and the accumulator of the message it
/// belongs to. The accumulator only holds a weak handle: a caller that is
/// not interested in the body may drop the stream at any time, and the
/// tokenizer's chunks are then silently discarded.
#[derive(Debug, Default)]
pub(crate) struct ChunkSlot {
    pub(crate) buf: BytesMut,
    pub(crate) complete: bool,
}

/// Implemented by the connection parser so the body stream can drive the
/// transport and tokenizer forward without knowing their concrete types.
pub(crate) trait PumpBody {
    fn pump(&mut self, deadline: Option<Instant>) -> Result<(), HttpError>;
}

/// A pull-based reader over one message's body.
///
/// Headers become visible to the caller before any body byte has to be
/// read from the transport; the body is only pulled when `read` is called.
/// Chunks are delivered in wire order and cannot be re-read.
pub struct BodyStream {
    slot: Rc<RefCell<ChunkSlot>>,
    parser: Weak<RefCell<dyn PumpBody>>,
}

impl BodyStream {
    pub(crate) fn new(slot: Rc<RefCell<ChunkSlot>>, parser: Weak<RefCell<dyn PumpBody>>) -> Self {
        Self { slot, parser }
    }

    /// Reads up to `buf.len()` body bytes, returning how many were written.
    ///
    /// Returns `Ok(0)` only at the end of the body. When the internal chunk
    /// slot is empty the owning parser is pumped, one transport read at a
    /// time, until a chunk (or end-of-message) shows up or the deadline
    /// expires. A deadline expiry surfaces as a retryable transport timeout
    /// and corrupts nothing; a retried call continues exactly where parsing
    /// left off.
    pub fn read(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> Result<usize, HttpError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            {
                let mut slot = self.slot.borrow_mut();
                if !slot.buf.is_empty() {
                    let n = cmp::min(buf.len(), slot.buf.len());
                    buf[..n].copy_from_slice(&slot.buf[..n]);
                    slot.buf.advance(n);
                    trace!(len = n, "drained body bytes");
                    return Ok(n);
                }
                if slot.complete {
                    return Ok(0);
                }
            }
            // The slot borrow must not be held here: pumping re-enters the
            // slot from the tokenizer's body event.
            let parser = self.parser.upgrade().ok_or_else(|| {
                ParseError::invalid_body("connection was dropped before the body was drained")
            })?;
            parser.borrow_mut().pump(deadline)?;
        }
    }

    /// True once the tokenizer has seen the end of this message.
    pub fn is_complete(&self) -> bool {
        self.slot.borrow().complete
    }

    /// Drains the whole remaining body into one buffer.
    ///
    /// Intended for small bodies; large bodies should be read chunk-wise.
    pub fn read_to_bytes(&mut self, deadline: Option<Instant>) -> Result<Bytes, HttpError> {
        let mut out = BytesMut::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read(&mut chunk, deadline)?;
            if n == 0 {
                return Ok(out.freeze());
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.slot.borrow().buf.len()
    }
}

impl io::Read for BodyStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        BodyStream::read(self, buf, None).map_err(|e| match e {
            HttpError::Transport { source } => source,
            HttpError::Parse { source } => io::Error::new(io::ErrorKind::InvalidData, source),
        })
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.borrow();
        f.debug_struct("BodyStream")
            .field("buffered", &slot.buf.len())
            .field("complete", &slot.complete)
            .finish()
    }
}
