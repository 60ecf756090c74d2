use std::cell::RefCell;
use std::mem;
use std::rc::Weak;

use bytes::BytesMut;
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::trace;

use crate::ensure;
use crate::protocol::ParseError;
use crate::protocol::Uri;
use crate::protocol::body::ChunkSlot;

/// Which logical field of the current message is being accumulated.
///
/// Strictly ordered per message; `HeaderField` and `HeaderValue` alternate
/// once per header, `Body` repeats once per tokenizer chunk event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseState {
    Ready,
    MessageBegin,
    Url,
    Status,
    HeaderField,
    HeaderValue,
    HeadersComplete,
    Body,
    MessageComplete,
}

/// Scratch state for the message currently being parsed.
///
/// One live instance per in-flight message. Holds the raw bytes of the
/// field under construction, the headers completed so far, the decomposed
/// target or reason phrase once seen, and a non-owning handle to the body
/// stream that will receive this message's chunks. The handle is weak on
/// purpose: an uninterested caller may drop the body stream long before
/// the message finishes arriving, and chunks are then simply discarded.
pub(crate) struct Context {
    state: ParseState,
    scratch: BytesMut,
    pending_name: Option<HeaderName>,
    headers: HeaderMap,
    uri: Option<Uri>,
    reason: Option<String>,
    body: Weak<RefCell<ChunkSlot>>,

    header_bytes: usize,
    header_count: usize,
    max_header_bytes: usize,
    max_headers: usize,
}

impl Context {
    pub(crate) fn new(max_header_bytes: usize, max_headers: usize) -> Self {
        Self {
            state: ParseState::Ready,
            scratch: BytesMut::new(),
            pending_name: None,
            headers: HeaderMap::new(),
            uri: None,
            reason: None,
            body: Weak::new(),
            header_bytes: 0,
            header_count: 0,
            max_header_bytes,
            max_headers,
        }
    }

    pub(crate) fn state(&self) -> ParseState {
        self.state
    }

    /// True between messages: a transport close here is orderly.
    pub(crate) fn is_idle(&self) -> bool {
        self.state == ParseState::Ready
    }

    /// Moves to `next`, closing out the current field first if the state
    /// actually changes, then appends `data` to the fresh field.
    ///
    /// This is called once per tokenizer event, which is once per pushed
    /// chunk, so consecutive calls with the same state keep accumulating
    /// and the close-out of each field runs exactly once per boundary.
    pub(crate) fn advance(&mut self, next: ParseState, data: &[u8]) -> Result<(), ParseError> {
        if next != self.state {
            self.flush()?;
            self.state = next;
        }
        match self.state {
            ParseState::Body => {
                // body bytes bypass the scratch buffer entirely: they go
                // straight to the stream's chunk slot, which the caller
                // drains before the tokenizer is driven again
                match self.body.upgrade() {
                    Some(slot) => slot.borrow_mut().buf.extend_from_slice(data),
                    None => trace!(len = data.len(), "body stream abandoned, dropping chunk"),
                }
            }
            ParseState::Url
            | ParseState::Status
            | ParseState::HeaderField
            | ParseState::HeaderValue => {
                self.header_bytes += data.len();
                ensure!(
                    self.header_bytes <= self.max_header_bytes,
                    ParseError::too_large_header(self.header_bytes, self.max_header_bytes)
                );
                self.scratch.extend_from_slice(data);
            }
            _ => debug_assert!(data.is_empty()),
        }
        Ok(())
    }

    /// Closes out the state being left: converts its accumulated raw bytes
    /// into a typed value and commits it.
    fn flush(&mut self) -> Result<(), ParseError> {
        match self.state {
            ParseState::Url => {
                let raw = mem::take(&mut self.scratch);
                let target = std::str::from_utf8(&raw)
                    .map_err(|_| ParseError::invalid_uri("request target is not valid UTF-8"))?;
                self.uri = Some(Uri::parse(target)?);
            }
            ParseState::Status => {
                let raw = mem::take(&mut self.scratch);
                let reason = std::str::from_utf8(&raw)
                    .map_err(|_| ParseError::invalid_status("reason phrase is not valid UTF-8"))?;
                self.reason = Some(reason.to_owned());
            }
            ParseState::HeaderField => {
                let raw = mem::take(&mut self.scratch);
                let name = HeaderName::from_bytes(&raw)
                    .map_err(|e| ParseError::invalid_header(format!("bad header name: {e}")))?;
                self.pending_name = Some(name);
            }
            ParseState::HeaderValue => {
                let raw = mem::take(&mut self.scratch);
                self.commit_header_value(&raw)?;
            }
            ParseState::Ready
            | ParseState::MessageBegin
            | ParseState::HeadersComplete
            | ParseState::Body
            | ParseState::MessageComplete => {
                debug_assert!(self.scratch.is_empty());
            }
        }
        Ok(())
    }

    /// Appends a completed value under the pending name. Repeated fields
    /// of the same name are joined with `", "` in arrival order.
    fn commit_header_value(&mut self, raw: &[u8]) -> Result<(), ParseError> {
        let name = self
            .pending_name
            .take()
            .ok_or_else(|| ParseError::invalid_header("header value without a name"))?;

        // the tokenizer strips leading OWS; trailing OWS can only be
        // trimmed here, once the whole value has been accumulated
        let mut value = raw;
        while let [rest @ .., b' ' | b'\t'] = value {
            value = rest;
        }

        self.header_count += 1;
        ensure!(
            self.header_count <= self.max_headers,
            ParseError::too_many_headers(self.max_headers)
        );

        match self.headers.get(&name) {
            Some(existing) => {
                let mut joined =
                    Vec::with_capacity(existing.as_bytes().len() + 2 + value.len());
                joined.extend_from_slice(existing.as_bytes());
                joined.extend_from_slice(b", ");
                joined.extend_from_slice(value);
                let joined = HeaderValue::from_bytes(&joined)
                    .map_err(|e| ParseError::invalid_header(format!("bad header value: {e}")))?;
                self.headers.insert(name, joined);
            }
            None => {
                let value = HeaderValue::from_bytes(value)
                    .map_err(|e| ParseError::invalid_header(format!("bad header value: {e}")))?;
                self.headers.insert(name, value);
            }
        }
        Ok(())
    }

    /// Wires up the chunk slot the current message's body events feed.
    pub(crate) fn attach_body(&mut self, slot: Weak<RefCell<ChunkSlot>>) {
        self.body = slot;
    }

    /// Hands out the assembled head once the header section is complete.
    /// The context stays alive to route body chunks.
    pub(crate) fn take_head(&mut self) -> (HeaderMap, Option<Uri>, Option<String>) {
        (mem::take(&mut self.headers), self.uri.take(), self.reason.take())
    }

    /// Closes the message: marks the body stream complete and resets into
    /// a fresh accumulator for the next message on the connection.
    pub(crate) fn finish_message(&mut self) {
        if let Some(slot) = self.body.upgrade() {
            slot.borrow_mut().complete = true;
        }
        self.state = ParseState::Ready;
        self.scratch.clear();
        self.pending_name = None;
        self.headers = HeaderMap::new();
        self.uri = None;
        self.reason = None;
        self.body = Weak::new();
        self.header_bytes = 0;
        self.header_count = 0;
    }
}
