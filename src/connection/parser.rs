use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use crate::codec::{Context, ParseState};
use crate::connection::direction::{Direction, RequestDirection, ResponseDirection};
use crate::protocol::body::{BodyStream, ChunkSlot, PumpBody};
use crate::protocol::{Body, HttpError, ParseError};
use crate::tokenizer::{TokenSink, TokenizedHead, Tokenizer};
use crate::transport::Transport;
use crate::ensure;

/// Tuning knobs for a [`MessageParser`].
#[derive(Debug, Clone, Copy)]
pub struct ParserConfig {
    /// Size of the transport read buffer. Also the upper bound on how many
    /// unconsumed body bytes a paused stream can hold.
    pub read_buffer_size: usize,
    /// Combined byte budget for the start line and header section of one
    /// message.
    pub max_header_bytes: usize,
    /// Maximum number of header fields per message, trailers excluded.
    pub max_headers: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { read_buffer_size: 8 * 1024, max_header_bytes: 8 * 1024, max_headers: 64 }
    }
}

/// Adapts tokenizer events onto the accumulator and the message queue for
/// the duration of one `feed`.
struct EventBridge<'a, D: Direction> {
    context: &'a mut Context,
    queue: &'a mut VecDeque<D::Message>,
    parser: &'a Weak<RefCell<dyn PumpBody>>,
}

impl<D: Direction> TokenSink for EventBridge<'_, D> {
    fn on_message_begin(&mut self) -> Result<(), ParseError> {
        self.context.advance(ParseState::MessageBegin, &[])
    }

    fn on_url(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        self.context.advance(ParseState::Url, chunk)
    }

    fn on_status(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        self.context.advance(ParseState::Status, chunk)
    }

    fn on_header_field(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        self.context.advance(ParseState::HeaderField, chunk)
    }

    fn on_header_value(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        self.context.advance(ParseState::HeaderValue, chunk)
    }

    fn on_headers_complete(&mut self, head: &TokenizedHead) -> Result<(), ParseError> {
        self.context.advance(ParseState::HeadersComplete, &[])?;

        // The message becomes visible to the caller now, with a body
        // stream that fills as the rest of the message arrives.
        let slot = Rc::new(RefCell::new(ChunkSlot::default()));
        self.context.attach_body(Rc::downgrade(&slot));
        let body = BodyStream::new(slot, self.parser.clone());

        let (headers, uri, reason) = self.context.take_head();
        let message = D::assemble(head, headers, uri, reason, Body::Stream(body))?;
        self.queue.push_back(message);
        trace!(queued = self.queue.len(), "message head complete");
        Ok(())
    }

    fn on_body(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
        self.context.advance(ParseState::Body, chunk)
    }

    fn on_message_complete(&mut self) -> Result<(), ParseError> {
        self.context.advance(ParseState::MessageComplete, &[])?;
        self.context.finish_message();
        trace!("message complete");
        Ok(())
    }
}

struct ParserInner<T, D: Direction> {
    transport: T,
    tokenizer: Tokenizer,
    context: Context,
    queue: VecDeque<D::Message>,
    read_buf: Box<[u8]>,
    self_handle: Weak<RefCell<dyn PumpBody>>,

    /// A parse failure that must wait until already-queued pipelined
    /// messages have been handed out.
    pending_error: Option<HttpError>,
    closed: bool,
    poisoned: bool,
}

impl<T: Transport + 'static, D: Direction> ParserInner<T, D> {
    /// One transport read fed through the tokenizer.
    ///
    /// Transport errors pass through untouched. Parse errors poison the
    /// parser; if pipelined messages are already queued the error is
    /// parked so they can still be delivered first.
    fn pump_once(&mut self, deadline: Option<Instant>) -> Result<(), HttpError> {
        match self.pump_raw(deadline) {
            Ok(()) => Ok(()),
            Err(err @ HttpError::Transport { .. }) => Err(err),
            Err(err) => {
                self.poisoned = true;
                if self.queue.is_empty() || self.pending_error.is_some() {
                    Err(err)
                } else {
                    debug!(cause = %err, "parking parse error behind queued messages");
                    self.pending_error = Some(err);
                    Ok(())
                }
            }
        }
    }

    fn pump_raw(&mut self, deadline: Option<Instant>) -> Result<(), HttpError> {
        if self.poisoned {
            return Err(ParseError::Poisoned.into());
        }
        if self.closed {
            return Err(ParseError::UnexpectedEof.into());
        }

        let Self { transport, tokenizer, context, queue, read_buf, self_handle, .. } = self;
        let n = transport.read(read_buf, deadline)?;
        let mut bridge = EventBridge::<D> { context, queue, parser: self_handle };

        if n == 0 {
            tokenizer.on_eof(&mut bridge)?;
            self.closed = true;
            trace!(state = ?self.context.state(), "transport closed cleanly");
            return Ok(());
        }

        trace!(len = n, "feeding tokenizer");
        let consumed = tokenizer.feed(&read_buf[..n], &mut bridge);
        if let Some(error) = tokenizer.take_error() {
            debug!(cause = %error, consumed, "parse failed");
            return Err(error.into());
        }
        ensure!(
            consumed == n,
            ParseError::invalid_body(format!(
                "tokenizer consumed {consumed} of {n} bytes without reporting an error"
            ))
            .into()
        );
        Ok(())
    }
}

impl<T: Transport + 'static, D: Direction> PumpBody for ParserInner<T, D> {
    fn pump(&mut self, deadline: Option<Instant>) -> Result<(), HttpError> {
        self.pump_once(deadline)
    }
}

/// Pull-based parser for one side of an HTTP/1.1 connection.
///
/// Wraps a [`Transport`] and hands out typed messages in wire order.
/// Message heads are delivered as soon as their header section has been
/// parsed; bodies are pulled lazily through each message's
/// [`BodyStream`]. Pipelined messages that arrive in one transport read
/// are queued and drained before the transport is touched again.
pub struct MessageParser<T, D: Direction> {
    inner: Rc<RefCell<ParserInner<T, D>>>,
}

/// Server-side parser producing [`crate::protocol::Request`]s.
pub type RequestParser<T> = MessageParser<T, RequestDirection>;

/// Client-side parser producing [`crate::protocol::Response`]s.
pub type ResponseParser<T> = MessageParser<T, ResponseDirection>;

impl<T: Transport + 'static, D: Direction> MessageParser<T, D> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ParserConfig::default())
    }

    pub fn with_config(transport: T, config: ParserConfig) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<RefCell<ParserInner<T, D>>>| {
            let self_handle: Weak<RefCell<dyn PumpBody>> = weak.clone();
            RefCell::new(ParserInner {
                transport,
                tokenizer: Tokenizer::new(D::KIND),
                context: Context::new(config.max_header_bytes, config.max_headers),
                queue: VecDeque::new(),
                read_buf: vec![0; config.read_buffer_size].into_boxed_slice(),
                self_handle,
                pending_error: None,
                closed: false,
                poisoned: false,
            })
        });
        Self { inner }
    }

    /// Returns the next message, or `Ok(None)` on an orderly close between
    /// messages.
    ///
    /// Blocks on the transport no later than `deadline`; expiry surfaces
    /// as a retryable timeout and leaves the parser exactly where it was.
    /// After a parse error the connection is poisoned and every further
    /// call fails, but messages queued before the error are still handed
    /// out first.
    pub fn read_next(&mut self, deadline: Option<Instant>) -> Result<Option<D::Message>, HttpError> {
        loop {
            let mut inner = self.inner.borrow_mut();
            if let Some(message) = inner.queue.pop_front() {
                return Ok(Some(message));
            }
            if let Some(error) = inner.pending_error.take() {
                return Err(error);
            }
            if inner.poisoned {
                return Err(ParseError::Poisoned.into());
            }
            if inner.closed {
                return Ok(None);
            }
            inner.pump_once(deadline)?;
        }
    }

    /// Runs the connection to completion, invoking `on_message` for every
    /// message.
    ///
    /// `timeout` bounds each individual `read_next`; an idle expiry is
    /// retried, so the loop only ends on an orderly close, a peer
    /// disconnect (both `Ok`) or a real failure.
    pub fn drive<F>(&mut self, timeout: Duration, mut on_message: F) -> Result<(), HttpError>
    where
        F: FnMut(D::Message) -> Result<(), HttpError>,
    {
        loop {
            let deadline = Instant::now().checked_add(timeout);
            match self.read_next(deadline) {
                Ok(Some(message)) => on_message(message)?,
                Ok(None) => {
                    info!("connection closed");
                    return Ok(());
                }
                Err(err) if err.is_timeout() => trace!("idle connection, retrying"),
                Err(err) if err.is_disconnect() => {
                    info!(cause = %err, "peer disconnected");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Shuts the underlying transport down.
    pub fn close(&mut self) -> io::Result<()> {
        self.inner.borrow_mut().transport.close()
    }
}

impl<T, D: Direction> fmt::Debug for MessageParser<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MessageParser")
            .field("queued", &inner.queue.len())
            .field("idle", &inner.context.is_idle())
            .field("closed", &inner.closed)
            .field("poisoned", &inner.poisoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use crate::transport::testing::ScriptedTransport;
    use http::StatusCode;
    use indoc::indoc;

    fn parse_err(err: HttpError) -> ParseError {
        match err {
            HttpError::Parse { source } => source,
            HttpError::Transport { source } => panic!("unexpected transport error: {source}"),
        }
    }

    #[test]
    fn pipelined_requests_from_one_read() {
        let raw = b"GET /one HTTP/1.1\r\nHost: a\r\n\r\nGET /two HTTP/1.1\r\nHost: a\r\n\r\n";
        let mut parser = RequestParser::new(ScriptedTransport::new().data(raw));

        let first = parser.read_next(None).unwrap().unwrap();
        assert_eq!(first.uri().path(), Some("/one"));
        let second = parser.read_next(None).unwrap().unwrap();
        assert_eq!(second.uri().path(), Some("/two"));
        assert!(parser.read_next(None).unwrap().is_none());
    }

    #[test]
    fn head_is_delivered_before_the_body_arrives() {
        let transport = ScriptedTransport::new()
            .data(b"POST /upload HTTP/1.1\r\nContent-Length: 11\r\n\r\n")
            .data(b"hello ")
            .data(b"world");
        let mut parser = RequestParser::new(transport);

        let mut request = parser.read_next(None).unwrap().unwrap();
        assert_eq!(request.headers().get("content-length").unwrap(), "11");

        let body = request.body_mut().as_stream_mut().unwrap();
        assert!(!body.is_complete());
        let bytes = body.read_to_bytes(None).unwrap();
        assert_eq!(&bytes[..], b"hello world");
        assert!(body.is_complete());
    }

    #[test]
    fn paused_body_never_buffers_more_than_one_read() {
        let transport = ScriptedTransport::new()
            .data(b"POST /big HTTP/1.1\r\nContent-Length: 12\r\n\r\n")
            .data(b"aaaa")
            .data(b"bbbb")
            .data(b"cccc");
        let mut parser = RequestParser::new(transport);

        let mut request = parser.read_next(None).unwrap().unwrap();
        let body = request.body_mut().as_stream_mut().unwrap();

        let mut total = Vec::new();
        let mut buf = [0u8; 2];
        loop {
            let n = body.read(&mut buf, None).unwrap();
            if n == 0 {
                break;
            }
            assert!(body.buffered() <= 4);
            total.extend_from_slice(&buf[..n]);
        }
        assert_eq!(total, b"aaaabbbbcccc");
    }

    #[test]
    fn chunked_body_reassembles_across_any_split() {
        let raw = b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trail: ignored\r\n\r\n";
        for split in 1..raw.len() {
            let transport =
                ScriptedTransport::new().data(&raw[..split]).data(&raw[split..]);
            let mut parser = RequestParser::new(transport);

            let mut request = parser.read_next(None).unwrap().unwrap();
            let bytes =
                request.body_mut().as_stream_mut().unwrap().read_to_bytes(None).unwrap();
            assert_eq!(&bytes[..], b"Wikipedia", "split at {split}");
            assert!(parser.read_next(None).unwrap().is_none());
        }
    }

    #[test]
    fn header_folding_survives_the_full_pipeline() {
        let raw = indoc! {"
            GET / HTTP/1.1
            X-Tag: alpha
            X-Tag: beta
            Host: example

        "}
        .replace('\n', "\r\n");
        let mut parser = RequestParser::new(ScriptedTransport::new().data(raw.as_bytes()));

        let request = parser.read_next(None).unwrap().unwrap();
        assert_eq!(request.headers().get("x-tag").unwrap(), "alpha, beta");
    }

    #[test]
    fn truncated_body_is_unexpected_eof() {
        let transport = ScriptedTransport::new()
            .data(b"POST /t HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc");
        let mut parser = RequestParser::new(transport);

        let mut request = parser.read_next(None).unwrap().unwrap();
        let err = request.body_mut().as_stream_mut().unwrap().read_to_bytes(None).unwrap_err();
        assert!(matches!(parse_err(err), ParseError::UnexpectedEof));
    }

    #[test]
    fn truncated_head_is_unexpected_eof() {
        let mut parser =
            RequestParser::new(ScriptedTransport::new().data(b"GET / HT"));
        let err = parser.read_next(None).unwrap_err();
        assert!(matches!(parse_err(err), ParseError::UnexpectedEof));
    }

    #[test]
    fn grammar_violation_poisons_the_connection() {
        let mut parser =
            RequestParser::new(ScriptedTransport::new().data(b"GE\x01T / HTTP/1.1\r\n\r\n"));

        let err = parser.read_next(None).unwrap_err();
        assert!(matches!(parse_err(err), ParseError::Grammar { .. }));
        let err = parser.read_next(None).unwrap_err();
        assert!(matches!(parse_err(err), ParseError::Poisoned));
    }

    #[test]
    fn decomposition_failure_still_delivers_earlier_messages() {
        let raw = b"GET /ok HTTP/1.1\r\n\r\nGET http:// HTTP/1.1\r\n\r\n";
        let mut parser = RequestParser::new(ScriptedTransport::new().data(raw));

        let first = parser.read_next(None).unwrap().unwrap();
        assert_eq!(first.uri().path(), Some("/ok"));

        let err = parser.read_next(None).unwrap_err();
        assert!(matches!(parse_err(err), ParseError::InvalidUri { .. }));
        let err = parser.read_next(None).unwrap_err();
        assert!(matches!(parse_err(err), ParseError::Poisoned));
    }

    #[test]
    fn timeout_is_retryable_mid_message() {
        let transport = ScriptedTransport::new()
            .data(b"GET /slow HT")
            .timeout()
            .data(b"TP/1.1\r\n\r\n");
        let mut parser = RequestParser::new(transport);

        let err = parser.read_next(None).unwrap_err();
        assert!(err.is_timeout());

        let request = parser.read_next(None).unwrap().unwrap();
        assert_eq!(request.uri().path(), Some("/slow"));
    }

    #[test]
    fn abandoned_body_does_not_block_the_next_message() {
        let transport = ScriptedTransport::new()
            .data(b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\n")
            .data(b"01234GET /b HTTP/1.1\r\n\r\n");
        let mut parser = RequestParser::new(transport);

        let first = parser.read_next(None).unwrap().unwrap();
        drop(first);

        let second = parser.read_next(None).unwrap().unwrap();
        assert_eq!(second.uri().path(), Some("/b"));
    }

    #[test]
    fn header_budget_is_enforced_per_message() {
        let config = ParserConfig { read_buffer_size: 512, max_header_bytes: 32, max_headers: 4 };
        let transport = ScriptedTransport::new()
            .data(b"GET / HTTP/1.1\r\nX-Big: 0123456789012345678901234567890123456789\r\n\r\n");
        let mut parser = RequestParser::with_config(transport, config);

        let err = parser.read_next(None).unwrap_err();
        assert!(matches!(parse_err(err), ParseError::TooLargeHeader { .. }));
    }

    #[test]
    fn drive_collects_until_clean_close() {
        let raw = b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n";
        let mut parser = RequestParser::new(ScriptedTransport::new().data(raw));

        let mut paths = Vec::new();
        parser
            .drive(Duration::from_secs(1), |request| {
                paths.push(request.uri().path().unwrap().to_owned());
                Ok(())
            })
            .unwrap();
        assert_eq!(paths, ["/one", "/two"]);
    }

    #[test]
    fn drive_treats_disconnect_as_done() {
        let transport = ScriptedTransport::new()
            .data(b"GET /only HTTP/1.1\r\n\r\n")
            .error(io::ErrorKind::ConnectionReset);
        let mut parser = RequestParser::new(transport);

        let mut seen = 0;
        parser
            .drive(Duration::from_secs(1), |_| {
                seen += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn response_body_runs_to_end_of_input() {
        let transport = ScriptedTransport::new()
            .data(b"HTTP/1.1 200 OK\r\nServer: t\r\n\r\npart one ")
            .data(b"part two");
        let mut parser = ResponseParser::new(transport);

        let mut response = parser.read_next(None).unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.reason(), "OK");

        let bytes =
            response.body_mut().as_stream_mut().unwrap().read_to_bytes(None).unwrap();
        assert_eq!(&bytes[..], b"part one part two");
        assert!(parser.read_next(None).unwrap().is_none());
    }

    #[test]
    fn out_of_range_status_is_a_decomposition_error() {
        let mut parser =
            ResponseParser::new(ScriptedTransport::new().data(b"HTTP/1.1 099 Weird\r\n\r\n"));
        let err = parser.read_next(None).unwrap_err();
        assert!(matches!(parse_err(err), ParseError::InvalidStatus { .. }));
    }
}
