//! Byte-level HTTP/1.1 grammar tokenizer.
//!
//! The tokenizer is a push-style collaborator: it consumes pushed chunks of
//! bytes, validates the HTTP grammar byte by byte, and fires typed events on
//! a [`TokenSink`] as it recognizes tokens. It never buffers message content;
//! a logical field that arrives across many pushed chunks is emitted as many
//! partial slices, one `TokenSink` call per fed chunk per field. Higher
//! layers own all accumulation.
//!
//! [`Tokenizer::feed`] returns the number of bytes consumed; a count below
//! the input length signals a grammar violation, retrievable through
//! [`Tokenizer::take_error`]. After a violation the tokenizer is dead: the
//! byte stream is at an indeterminate position and cannot be resynchronized.
//!
//! Body framing is resolved from the headers the tokenizer tracks for its
//! own purposes (`Content-Length`, `Transfer-Encoding: chunked`); responses
//! with neither are read until end of input, which the driving layer reports
//! through [`Tokenizer::on_eof`].

use std::cmp;

use http::{Method, Version};
use thiserror::Error;
use tracing::trace;

use crate::protocol::ParseError;

/// Which direction of the protocol the tokenizer validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Request,
    Response,
}

/// The start-line fields the tokenizer resolves itself, handed to the sink
/// when the header section completes. `method` is present for requests,
/// `status` is meaningful for responses.
#[derive(Debug, Clone)]
pub struct TokenizedHead {
    pub method: Option<Method>,
    pub version: Version,
    pub status: u16,
}

/// Grammar violations, each with a stable native code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GrammarError {
    #[error("invalid method")]
    InvalidMethod,
    #[error("invalid character in request target")]
    InvalidUrl,
    #[error("invalid HTTP version")]
    InvalidVersion,
    #[error("invalid status line")]
    InvalidStatus,
    #[error("invalid header name")]
    InvalidHeaderName,
    #[error("invalid character in header value")]
    InvalidHeaderValue,
    #[error("invalid content-length")]
    InvalidContentLength,
    #[error("unsupported transfer-encoding")]
    UnsupportedTransferEncoding,
    #[error("conflicting message framing headers")]
    ConflictingFraming,
    #[error("invalid chunk size")]
    InvalidChunkSize,
    #[error("expected CRLF")]
    ExpectedCrlf,
    #[error("invalid trailer section")]
    InvalidTrailer,
    #[error("tokenizer used after a fatal error")]
    Dead,
}

impl GrammarError {
    /// Native numeric error code, preserved on the errors surfaced to
    /// callers.
    pub fn code(self) -> u8 {
        match self {
            GrammarError::InvalidMethod => 1,
            GrammarError::InvalidUrl => 2,
            GrammarError::InvalidVersion => 3,
            GrammarError::InvalidStatus => 4,
            GrammarError::InvalidHeaderName => 5,
            GrammarError::InvalidHeaderValue => 6,
            GrammarError::InvalidContentLength => 7,
            GrammarError::UnsupportedTransferEncoding => 8,
            GrammarError::ConflictingFraming => 9,
            GrammarError::InvalidChunkSize => 10,
            GrammarError::ExpectedCrlf => 11,
            GrammarError::InvalidTrailer => 12,
            GrammarError::Dead => 13,
        }
    }
}

/// Receiver of tokenizer events.
///
/// All slice-carrying events may deliver partial fields; events are fired
/// synchronously from within [`Tokenizer::feed`]. An `Err` from any method
/// aborts the feed at the current position.
pub trait TokenSink {
    fn on_message_begin(&mut self) -> Result<(), ParseError>;
    fn on_url(&mut self, chunk: &[u8]) -> Result<(), ParseError>;
    fn on_status(&mut self, chunk: &[u8]) -> Result<(), ParseError>;
    fn on_header_field(&mut self, chunk: &[u8]) -> Result<(), ParseError>;
    fn on_header_value(&mut self, chunk: &[u8]) -> Result<(), ParseError>;
    fn on_headers_complete(&mut self, head: &TokenizedHead) -> Result<(), ParseError>;
    fn on_body(&mut self, chunk: &[u8]) -> Result<(), ParseError>;
    fn on_message_complete(&mut self) -> Result<(), ParseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Idle,
    Method,
    BeforeUrl,
    Url,
    VersionPrefix,
    VersionMajor,
    VersionDot,
    VersionMinor,
    AfterVersion,
    StartLineLf,
    StatusCode,
    AfterStatus,
    Reason,
    HeaderFieldStart,
    HeaderField,
    HeaderValueOws,
    HeaderValue,
    HeaderLineLf,
    HeadersAlmostDone,
    BodyIdentity,
    BodyToEof,
    ChunkSizeStart,
    ChunkSize,
    ChunkExt,
    ChunkSizeLf,
    ChunkData,
    ChunkDataCr,
    ChunkDataLf,
    TrailerStart,
    TrailerLine,
    TrailerLineLf,
    TrailerEndLf,
    Dead,
}

/// Which framing-relevant header the tokenizer is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interest {
    None,
    ContentLength,
    TransferEncoding,
}

struct Fail {
    consumed: usize,
    error: ParseError,
}

const MAX_METHOD_LEN: usize = 32;
// longest framing-relevant header name is "transfer-encoding"
const MAX_TRACKED_NAME: usize = 17;
const MAX_CONTENT_LENGTH_VALUE: usize = 40;
const MAX_TRANSFER_ENCODING_VALUE: usize = 256;

/// Incremental HTTP/1.1 grammar validator.
pub struct Tokenizer {
    kind: Kind,
    state: LexState,
    error: Option<ParseError>,

    method_buf: Vec<u8>,
    method: Option<Method>,
    version_idx: usize,
    version_minor: u8,
    status_code: u16,
    status_digits: u8,

    interest: Interest,
    name_acc: Vec<u8>,
    name_overflow: bool,
    value_acc: Vec<u8>,
    content_length: Option<u64>,
    chunked: bool,

    remaining: u64,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer").field("kind", &self.kind).field("state", &self.state).finish()
    }
}

macro_rules! fail {
    ($i:expr, $err:expr) => {
        return Err(Fail { consumed: $i, error: $err.into() })
    };
}

macro_rules! emit {
    ($i:expr, $call:expr) => {
        if let Err(e) = $call {
            return Err(Fail { consumed: $i, error: e });
        }
    };
}

impl Tokenizer {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            state: LexState::Idle,
            error: None,
            method_buf: Vec::new(),
            method: None,
            version_idx: 0,
            version_minor: 1,
            status_code: 0,
            status_digits: 0,
            interest: Interest::None,
            name_acc: Vec::new(),
            name_overflow: false,
            value_acc: Vec::new(),
            content_length: None,
            chunked: false,
            remaining: 0,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Feeds a chunk of bytes, firing sink events as tokens are recognized.
    ///
    /// Returns the number of bytes consumed. A count below `input.len()`
    /// signals a violation; the error is available via [`take_error`] and
    /// the tokenizer is dead from then on.
    ///
    /// [`take_error`]: Tokenizer::take_error
    pub fn feed<S: TokenSink>(&mut self, input: &[u8], sink: &mut S) -> usize {
        if self.error.is_some() || self.state == LexState::Dead {
            return 0;
        }
        match self.run(input, sink) {
            Ok(()) => input.len(),
            Err(fail) => {
                trace!(consumed = fail.consumed, error = %fail.error, "tokenizer rejected input");
                self.state = LexState::Dead;
                self.error = Some(fail.error);
                fail.consumed
            }
        }
    }

    /// Takes the error behind a short consumed-byte count.
    pub fn take_error(&mut self) -> Option<ParseError> {
        self.error.take()
    }

    /// Tells the tokenizer the transport reached end of input.
    ///
    /// Between messages this is a clean close. For a response body that
    /// runs until close it completes the message (firing
    /// `on_message_complete`). Anywhere else the message was truncated.
    pub fn on_eof<S: TokenSink>(&mut self, sink: &mut S) -> Result<(), ParseError> {
        match self.state {
            LexState::Idle => Ok(()),
            LexState::BodyToEof => match self.complete(sink, 0) {
                Ok(()) => Ok(()),
                Err(fail) => {
                    self.state = LexState::Dead;
                    self.error = Some(fail.error.clone());
                    Err(fail.error)
                }
            },
            LexState::Dead => Err(self.error.clone().unwrap_or_else(|| GrammarError::Dead.into())),
            _ => {
                self.state = LexState::Dead;
                self.error = Some(ParseError::UnexpectedEof);
                Err(ParseError::UnexpectedEof)
            }
        }
    }

    fn run<S: TokenSink>(&mut self, input: &[u8], sink: &mut S) -> Result<(), Fail> {
        let len = input.len();
        let mut i = 0;
        while i < len {
            let b = input[i];
            match self.state {
                LexState::Idle => match b {
                    // tolerate CRLF between messages on a reused connection
                    b'\r' | b'\n' => i += 1,
                    _ => {
                        self.reset_message();
                        emit!(i, sink.on_message_begin());
                        self.state = match self.kind {
                            Kind::Request => LexState::Method,
                            Kind::Response => LexState::VersionPrefix,
                        };
                    }
                },

                LexState::Method => match b {
                    b' ' => {
                        if self.method_buf.is_empty() {
                            fail!(i, GrammarError::InvalidMethod);
                        }
                        // token bytes always resolve, extension methods included
                        match Method::from_bytes(&self.method_buf) {
                            Ok(method) => self.method = Some(method),
                            Err(_) => fail!(i, GrammarError::InvalidMethod),
                        }
                        self.state = LexState::BeforeUrl;
                        i += 1;
                    }
                    b if is_token(b) => {
                        if self.method_buf.len() >= MAX_METHOD_LEN {
                            fail!(i, GrammarError::InvalidMethod);
                        }
                        self.method_buf.push(b);
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::InvalidMethod),
                },

                LexState::BeforeUrl => match b {
                    b' ' => i += 1,
                    b if is_url_byte(b) => self.state = LexState::Url,
                    _ => fail!(i, GrammarError::InvalidUrl),
                },

                LexState::Url => {
                    let start = i;
                    while i < len && is_url_byte(input[i]) {
                        i += 1;
                    }
                    if i > start {
                        emit!(i, sink.on_url(&input[start..i]));
                    }
                    if i < len {
                        match input[i] {
                            b' ' => {
                                self.version_idx = 0;
                                self.state = LexState::VersionPrefix;
                                i += 1;
                            }
                            _ => fail!(i, GrammarError::InvalidUrl),
                        }
                    }
                }

                LexState::VersionPrefix => {
                    if b == b"HTTP/"[self.version_idx] {
                        self.version_idx += 1;
                        i += 1;
                        if self.version_idx == 5 {
                            self.state = LexState::VersionMajor;
                        }
                    } else {
                        fail!(i, GrammarError::InvalidVersion);
                    }
                }

                LexState::VersionMajor => match b {
                    b'1' => {
                        self.state = LexState::VersionDot;
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::InvalidVersion),
                },

                LexState::VersionDot => match b {
                    b'.' => {
                        self.state = LexState::VersionMinor;
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::InvalidVersion),
                },

                LexState::VersionMinor => match b {
                    b'0' | b'1' => {
                        self.version_minor = b - b'0';
                        self.state = LexState::AfterVersion;
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::InvalidVersion),
                },

                LexState::AfterVersion => match (self.kind, b) {
                    (Kind::Request, b'\r') => {
                        self.state = LexState::StartLineLf;
                        i += 1;
                    }
                    (Kind::Response, b' ') => {
                        self.status_code = 0;
                        self.status_digits = 0;
                        self.state = LexState::StatusCode;
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::InvalidVersion),
                },

                LexState::StartLineLf => match b {
                    b'\n' => {
                        self.state = LexState::HeaderFieldStart;
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::ExpectedCrlf),
                },

                LexState::StatusCode => match b {
                    b'0'..=b'9' => {
                        self.status_code = self.status_code * 10 + u16::from(b - b'0');
                        self.status_digits += 1;
                        if self.status_digits == 3 {
                            self.state = LexState::AfterStatus;
                        }
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::InvalidStatus),
                },

                LexState::AfterStatus => match b {
                    b' ' => {
                        self.state = LexState::Reason;
                        i += 1;
                    }
                    b'\r' => {
                        self.state = LexState::StartLineLf;
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::InvalidStatus),
                },

                LexState::Reason => {
                    let start = i;
                    while i < len && is_reason_byte(input[i]) {
                        i += 1;
                    }
                    if i > start {
                        emit!(i, sink.on_status(&input[start..i]));
                    }
                    if i < len {
                        match input[i] {
                            b'\r' => {
                                self.state = LexState::StartLineLf;
                                i += 1;
                            }
                            _ => fail!(i, GrammarError::InvalidStatus),
                        }
                    }
                }

                LexState::HeaderFieldStart => match b {
                    b'\r' => {
                        self.state = LexState::HeadersAlmostDone;
                        i += 1;
                    }
                    // obs-fold is obsolete and rejected
                    b' ' | b'\t' => fail!(i, GrammarError::InvalidHeaderName),
                    b if is_token(b) => {
                        self.name_acc.clear();
                        self.name_overflow = false;
                        self.state = LexState::HeaderField;
                    }
                    _ => fail!(i, GrammarError::InvalidHeaderName),
                },

                LexState::HeaderField => {
                    let start = i;
                    while i < len && is_token(input[i]) {
                        i += 1;
                    }
                    if i > start {
                        self.accumulate_name(&input[start..i]);
                        emit!(i, sink.on_header_field(&input[start..i]));
                    }
                    if i < len {
                        match input[i] {
                            b':' => {
                                self.finish_header_name();
                                self.state = LexState::HeaderValueOws;
                                i += 1;
                            }
                            _ => fail!(i, GrammarError::InvalidHeaderName),
                        }
                    }
                }

                LexState::HeaderValueOws => match b {
                    b' ' | b'\t' => i += 1,
                    b'\r' => {
                        // empty value still produces an event so downstream
                        // state tracking sees the field boundary
                        emit!(i, sink.on_header_value(b""));
                        if let Err(e) = self.finish_header_value() {
                            fail!(i, e);
                        }
                        self.state = LexState::HeaderLineLf;
                        i += 1;
                    }
                    b if is_value_byte(b) => self.state = LexState::HeaderValue,
                    _ => fail!(i, GrammarError::InvalidHeaderValue),
                },

                LexState::HeaderValue => {
                    let start = i;
                    while i < len && is_value_byte(input[i]) {
                        i += 1;
                    }
                    if i > start {
                        if let Err(e) = self.accumulate_value(&input[start..i]) {
                            fail!(start, e);
                        }
                        emit!(i, sink.on_header_value(&input[start..i]));
                    }
                    if i < len {
                        match input[i] {
                            b'\r' => {
                                if let Err(e) = self.finish_header_value() {
                                    fail!(i, e);
                                }
                                self.state = LexState::HeaderLineLf;
                                i += 1;
                            }
                            _ => fail!(i, GrammarError::InvalidHeaderValue),
                        }
                    }
                }

                LexState::HeaderLineLf => match b {
                    b'\n' => {
                        self.state = LexState::HeaderFieldStart;
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::ExpectedCrlf),
                },

                LexState::HeadersAlmostDone => match b {
                    b'\n' => {
                        i += 1;
                        if self.chunked && self.content_length.is_some() {
                            fail!(i, GrammarError::ConflictingFraming);
                        }
                        let head = TokenizedHead {
                            method: self.method.clone(),
                            version: self.version(),
                            status: self.status_code,
                        };
                        emit!(i, sink.on_headers_complete(&head));
                        self.enter_body(sink, i)?;
                    }
                    _ => fail!(i, GrammarError::ExpectedCrlf),
                },

                LexState::BodyIdentity => {
                    let take = cmp::min(self.remaining, (len - i) as u64) as usize;
                    emit!(i + take, sink.on_body(&input[i..i + take]));
                    i += take;
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.complete(sink, i)?;
                    }
                }

                LexState::BodyToEof => {
                    emit!(len, sink.on_body(&input[i..]));
                    i = len;
                }

                LexState::ChunkSizeStart => match hex_digit(b) {
                    Some(d) => {
                        self.remaining = u64::from(d);
                        self.state = LexState::ChunkSize;
                        i += 1;
                    }
                    None => fail!(i, GrammarError::InvalidChunkSize),
                },

                LexState::ChunkSize => match b {
                    b';' => {
                        self.state = LexState::ChunkExt;
                        i += 1;
                    }
                    b'\r' => {
                        self.state = LexState::ChunkSizeLf;
                        i += 1;
                    }
                    b => match hex_digit(b) {
                        Some(d) => {
                            if self.remaining > (u64::MAX - 15) / 16 {
                                fail!(i, GrammarError::InvalidChunkSize);
                            }
                            self.remaining = self.remaining * 16 + u64::from(d);
                            i += 1;
                        }
                        None => fail!(i, GrammarError::InvalidChunkSize),
                    },
                },

                LexState::ChunkExt => match b {
                    b'\r' => {
                        self.state = LexState::ChunkSizeLf;
                        i += 1;
                    }
                    b'\n' | b'\0' => fail!(i, GrammarError::InvalidChunkSize),
                    _ => i += 1,
                },

                LexState::ChunkSizeLf => match b {
                    b'\n' => {
                        self.state = if self.remaining == 0 {
                            LexState::TrailerStart
                        } else {
                            LexState::ChunkData
                        };
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::ExpectedCrlf),
                },

                LexState::ChunkData => {
                    let take = cmp::min(self.remaining, (len - i) as u64) as usize;
                    emit!(i + take, sink.on_body(&input[i..i + take]));
                    i += take;
                    self.remaining -= take as u64;
                    if self.remaining == 0 {
                        self.state = LexState::ChunkDataCr;
                    }
                }

                LexState::ChunkDataCr => match b {
                    b'\r' => {
                        self.state = LexState::ChunkDataLf;
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::ExpectedCrlf),
                },

                LexState::ChunkDataLf => match b {
                    b'\n' => {
                        self.state = LexState::ChunkSizeStart;
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::ExpectedCrlf),
                },

                LexState::TrailerStart => match b {
                    b'\r' => {
                        self.state = LexState::TrailerEndLf;
                        i += 1;
                    }
                    // trailers are validated and discarded, never surfaced
                    b if is_token(b) => self.state = LexState::TrailerLine,
                    _ => fail!(i, GrammarError::InvalidTrailer),
                },

                LexState::TrailerLine => {
                    while i < len && is_trailer_byte(input[i]) {
                        i += 1;
                    }
                    if i < len {
                        match input[i] {
                            b'\r' => {
                                self.state = LexState::TrailerLineLf;
                                i += 1;
                            }
                            _ => fail!(i, GrammarError::InvalidTrailer),
                        }
                    }
                }

                LexState::TrailerLineLf => match b {
                    b'\n' => {
                        self.state = LexState::TrailerStart;
                        i += 1;
                    }
                    _ => fail!(i, GrammarError::ExpectedCrlf),
                },

                LexState::TrailerEndLf => match b {
                    b'\n' => {
                        i += 1;
                        self.complete(sink, i)?;
                    }
                    _ => fail!(i, GrammarError::ExpectedCrlf),
                },

                LexState::Dead => fail!(i, GrammarError::Dead),
            }
        }
        Ok(())
    }

    /// Picks the body framing after the header section and, for bodiless
    /// messages, completes them immediately.
    fn enter_body<S: TokenSink>(&mut self, sink: &mut S, consumed: usize) -> Result<(), Fail> {
        let bodiless = match self.kind {
            Kind::Request => false,
            Kind::Response => {
                matches!(self.status_code, 100..=199 | 204 | 304)
            }
        };
        if bodiless {
            return self.complete(sink, consumed);
        }
        if self.chunked {
            self.state = LexState::ChunkSizeStart;
            return Ok(());
        }
        match (self.kind, self.content_length) {
            (_, Some(0)) => self.complete(sink, consumed),
            (_, Some(n)) => {
                self.remaining = n;
                self.state = LexState::BodyIdentity;
                Ok(())
            }
            (Kind::Request, None) => self.complete(sink, consumed),
            (Kind::Response, None) => {
                self.state = LexState::BodyToEof;
                Ok(())
            }
        }
    }

    fn complete<S: TokenSink>(&mut self, sink: &mut S, consumed: usize) -> Result<(), Fail> {
        emit!(consumed, sink.on_message_complete());
        self.state = LexState::Idle;
        Ok(())
    }

    fn reset_message(&mut self) {
        self.method_buf.clear();
        self.method = None;
        self.version_idx = 0;
        self.version_minor = 1;
        self.status_code = 0;
        self.status_digits = 0;
        self.interest = Interest::None;
        self.name_acc.clear();
        self.name_overflow = false;
        self.value_acc.clear();
        self.content_length = None;
        self.chunked = false;
        self.remaining = 0;
    }

    fn version(&self) -> Version {
        match self.version_minor {
            0 => Version::HTTP_10,
            _ => Version::HTTP_11,
        }
    }

    fn accumulate_name(&mut self, chunk: &[u8]) {
        if self.name_overflow {
            return;
        }
        if self.name_acc.len() + chunk.len() > MAX_TRACKED_NAME {
            self.name_overflow = true;
            self.name_acc.clear();
            return;
        }
        self.name_acc.extend(chunk.iter().map(u8::to_ascii_lowercase));
    }

    fn finish_header_name(&mut self) {
        self.interest = if self.name_overflow {
            Interest::None
        } else {
            match self.name_acc.as_slice() {
                b"content-length" => Interest::ContentLength,
                b"transfer-encoding" => Interest::TransferEncoding,
                _ => Interest::None,
            }
        };
        self.value_acc.clear();
    }

    fn accumulate_value(&mut self, chunk: &[u8]) -> Result<(), GrammarError> {
        match self.interest {
            Interest::ContentLength => {
                if self.value_acc.len() + chunk.len() > MAX_CONTENT_LENGTH_VALUE {
                    return Err(GrammarError::InvalidContentLength);
                }
                self.value_acc.extend_from_slice(chunk);
            }
            Interest::TransferEncoding => {
                if self.value_acc.len() + chunk.len() > MAX_TRANSFER_ENCODING_VALUE {
                    return Err(GrammarError::UnsupportedTransferEncoding);
                }
                self.value_acc.extend_from_slice(chunk);
            }
            Interest::None => {}
        }
        Ok(())
    }

    fn finish_header_value(&mut self) -> Result<(), GrammarError> {
        let interest = self.interest;
        self.interest = Interest::None;
        match interest {
            Interest::ContentLength => {
                let raw = trim_ows(&self.value_acc);
                if raw.is_empty() {
                    return Err(GrammarError::InvalidContentLength);
                }
                let mut value: u64 = 0;
                for &b in raw {
                    let d = match b {
                        b'0'..=b'9' => u64::from(b - b'0'),
                        _ => return Err(GrammarError::InvalidContentLength),
                    };
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(d))
                        .ok_or(GrammarError::InvalidContentLength)?;
                }
                // repeated content-length headers must agree
                if let Some(previous) = self.content_length {
                    if previous != value {
                        return Err(GrammarError::InvalidContentLength);
                    }
                }
                self.content_length = Some(value);
            }
            Interest::TransferEncoding => {
                let raw = self.value_acc.to_ascii_lowercase();
                let last = raw
                    .split(|&b| b == b',')
                    .map(trim_ows)
                    .next_back()
                    .unwrap_or(&[]);
                if last == b"chunked" {
                    self.chunked = true;
                } else {
                    return Err(GrammarError::UnsupportedTransferEncoding);
                }
            }
            Interest::None => {}
        }
        Ok(())
    }
}

fn trim_ows(mut raw: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = raw {
        raw = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = raw {
        raw = rest;
    }
    raw
}

fn is_token(b: u8) -> bool {
    matches!(b,
        b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9'
        | b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+'
        | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~')
}

fn is_url_byte(b: u8) -> bool {
    b > 0x20 && b != 0x7f
}

fn is_reason_byte(b: u8) -> bool {
    b == b'\t' || (b >= 0x20 && b != 0x7f)
}

fn is_value_byte(b: u8) -> bool {
    b == b'\t' || (b >= 0x20 && b != 0x7f)
}

fn is_trailer_byte(b: u8) -> bool {
    b == b'\t' || (b >= 0x20 && b != 0x7f)
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Ev {
        Begin,
        Url(Vec<u8>),
        Status(Vec<u8>),
        Field(Vec<u8>),
        Value(Vec<u8>),
        HeadersComplete(Option<Method>, Version, u16),
        Body(Vec<u8>),
        Complete,
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Ev>,
    }

    impl Recorder {
        fn completed(&self) -> usize {
            self.events.iter().filter(|e| matches!(e, Ev::Complete)).count()
        }

        fn body(&self) -> Vec<u8> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Ev::Body(chunk) => Some(chunk.as_slice()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .concat()
        }

        fn url(&self) -> Vec<u8> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    Ev::Url(chunk) => Some(chunk.as_slice()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .concat()
        }
    }

    impl TokenSink for Recorder {
        fn on_message_begin(&mut self) -> Result<(), ParseError> {
            self.events.push(Ev::Begin);
            Ok(())
        }
        fn on_url(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
            self.events.push(Ev::Url(chunk.to_vec()));
            Ok(())
        }
        fn on_status(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
            self.events.push(Ev::Status(chunk.to_vec()));
            Ok(())
        }
        fn on_header_field(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
            self.events.push(Ev::Field(chunk.to_vec()));
            Ok(())
        }
        fn on_header_value(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
            self.events.push(Ev::Value(chunk.to_vec()));
            Ok(())
        }
        fn on_headers_complete(&mut self, head: &TokenizedHead) -> Result<(), ParseError> {
            self.events.push(Ev::HeadersComplete(head.method.clone(), head.version, head.status));
            Ok(())
        }
        fn on_body(&mut self, chunk: &[u8]) -> Result<(), ParseError> {
            if !chunk.is_empty() {
                self.events.push(Ev::Body(chunk.to_vec()));
            }
            Ok(())
        }
        fn on_message_complete(&mut self) -> Result<(), ParseError> {
            self.events.push(Ev::Complete);
            Ok(())
        }
    }

    fn feed_all(tokenizer: &mut Tokenizer, input: &[u8], sink: &mut Recorder) {
        let consumed = tokenizer.feed(input, sink);
        assert_eq!(consumed, input.len(), "unexpected error: {:?}", tokenizer.take_error());
    }

    #[test]
    fn minimal_get() {
        let mut tokenizer = Tokenizer::new(Kind::Request);
        let mut sink = Recorder::default();
        feed_all(&mut tokenizer, b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n", &mut sink);

        assert_eq!(sink.events[0], Ev::Begin);
        assert_eq!(sink.url(), b"/x");
        assert!(sink
            .events
            .contains(&Ev::HeadersComplete(Some(Method::GET), Version::HTTP_11, 0)));
        assert_eq!(sink.completed(), 1);
    }

    #[test]
    fn split_anywhere_yields_same_tokens() {
        let raw = b"POST /submit?x=1 HTTP/1.1\r\nHost: example\r\nContent-Length: 5\r\n\r\nhello";
        let mut whole = Recorder::default();
        feed_all(&mut Tokenizer::new(Kind::Request), raw, &mut whole);

        for split in 1..raw.len() {
            let mut tokenizer = Tokenizer::new(Kind::Request);
            let mut sink = Recorder::default();
            feed_all(&mut tokenizer, &raw[..split], &mut sink);
            feed_all(&mut tokenizer, &raw[split..], &mut sink);

            assert_eq!(sink.url(), whole.url(), "split at {split}");
            assert_eq!(sink.body(), whole.body(), "split at {split}");
            assert_eq!(sink.completed(), 1, "split at {split}");
        }
    }

    #[test]
    fn byte_by_byte() {
        let raw = b"GET / HTTP/1.0\r\nA: b\r\nC: d\r\n\r\n";
        let mut tokenizer = Tokenizer::new(Kind::Request);
        let mut sink = Recorder::default();
        for &b in raw.iter() {
            feed_all(&mut tokenizer, &[b], &mut sink);
        }
        assert!(sink
            .events
            .contains(&Ev::HeadersComplete(Some(Method::GET), Version::HTTP_10, 0)));
        assert_eq!(sink.completed(), 1);
    }

    #[test]
    fn chunked_body_with_extension_and_trailer() {
        let raw = b"POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
                    4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Checksum: abc\r\n\r\n";
        let mut tokenizer = Tokenizer::new(Kind::Request);
        let mut sink = Recorder::default();
        feed_all(&mut tokenizer, raw, &mut sink);

        assert_eq!(sink.body(), b"Wikipedia");
        assert_eq!(sink.completed(), 1);
        // trailer fields are consumed but never surfaced as header events
        assert!(!sink.events.contains(&Ev::Field(b"X-Checksum".to_vec())));
    }

    #[test]
    fn response_with_reason_and_length() {
        let raw = b"HTTP/1.1 404 Not Found\r\nContent-Length: 3\r\n\r\nabc";
        let mut tokenizer = Tokenizer::new(Kind::Response);
        let mut sink = Recorder::default();
        feed_all(&mut tokenizer, raw, &mut sink);

        assert!(sink.events.contains(&Ev::HeadersComplete(None, Version::HTTP_11, 404)));
        assert!(sink.events.contains(&Ev::Status(b"Not Found".to_vec())));
        assert_eq!(sink.body(), b"abc");
        assert_eq!(sink.completed(), 1);
    }

    #[test]
    fn response_body_runs_to_eof() {
        let raw = b"HTTP/1.1 200 OK\r\n\r\nstreaming until close";
        let mut tokenizer = Tokenizer::new(Kind::Response);
        let mut sink = Recorder::default();
        feed_all(&mut tokenizer, raw, &mut sink);

        assert_eq!(sink.body(), b"streaming until close");
        assert_eq!(sink.completed(), 0);

        tokenizer.on_eof(&mut sink).unwrap();
        assert_eq!(sink.completed(), 1);
    }

    #[test]
    fn bodiless_response_statuses() {
        let raw = b"HTTP/1.1 204 No Content\r\n\r\nHTTP/1.1 304 Not Modified\r\n\r\n";
        let mut tokenizer = Tokenizer::new(Kind::Response);
        let mut sink = Recorder::default();
        feed_all(&mut tokenizer, raw, &mut sink);
        assert_eq!(sink.completed(), 2);
        assert!(sink.body().is_empty());
    }

    #[test]
    fn pipelined_requests_in_one_buffer() {
        let raw = b"GET /a HTTP/1.1\r\nHost: h\r\n\r\nGET /b HTTP/1.1\r\nHost: h\r\n\r\n";
        let mut tokenizer = Tokenizer::new(Kind::Request);
        let mut sink = Recorder::default();
        feed_all(&mut tokenizer, raw, &mut sink);
        assert_eq!(sink.completed(), 2);
        assert_eq!(sink.url(), b"/a/b");
    }

    #[test]
    fn control_character_in_start_line_is_rejected() {
        let mut tokenizer = Tokenizer::new(Kind::Request);
        let mut sink = Recorder::default();
        let raw = b"GET /\x01bad HTTP/1.1\r\n\r\n";
        let consumed = tokenizer.feed(raw, &mut sink);

        assert!(consumed < raw.len());
        match tokenizer.take_error() {
            Some(ParseError::Grammar { source }) => {
                assert_eq!(source, GrammarError::InvalidUrl);
                assert_eq!(source.code(), 2);
            }
            other => panic!("expected grammar error, got {other:?}"),
        }
        assert_eq!(sink.completed(), 0);
        // dead from now on
        assert_eq!(tokenizer.feed(b"GET / HTTP/1.1\r\n\r\n", &mut sink), 0);
    }

    #[test]
    fn conflicting_framing_is_rejected() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut tokenizer = Tokenizer::new(Kind::Request);
        let mut sink = Recorder::default();
        let consumed = tokenizer.feed(raw, &mut sink);
        assert!(consumed < raw.len());
        assert!(matches!(
            tokenizer.take_error(),
            Some(ParseError::Grammar { source: GrammarError::ConflictingFraming })
        ));
    }

    #[test]
    fn conflicting_content_lengths_are_rejected() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\n";
        let mut tokenizer = Tokenizer::new(Kind::Request);
        let mut sink = Recorder::default();
        let consumed = tokenizer.feed(raw, &mut sink);
        assert!(consumed < raw.len());
        assert!(matches!(
            tokenizer.take_error(),
            Some(ParseError::Grammar { source: GrammarError::InvalidContentLength })
        ));
    }

    #[test]
    fn eof_mid_message_is_truncation() {
        let mut tokenizer = Tokenizer::new(Kind::Request);
        let mut sink = Recorder::default();
        feed_all(&mut tokenizer, b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc", &mut sink);
        assert!(matches!(tokenizer.on_eof(&mut sink), Err(ParseError::UnexpectedEof)));
    }

    #[test]
    fn extension_method() {
        let mut tokenizer = Tokenizer::new(Kind::Request);
        let mut sink = Recorder::default();
        feed_all(&mut tokenizer, b"PURGE /cache HTTP/1.1\r\n\r\n", &mut sink);
        let expected = Method::from_bytes(b"PURGE").unwrap();
        assert!(sink
            .events
            .contains(&Ev::HeadersComplete(Some(expected), Version::HTTP_11, 0)));
    }
}
