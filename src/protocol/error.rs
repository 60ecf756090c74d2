use std::io;
use thiserror::Error;

use crate::tokenizer::GrammarError;

/// Top-level error produced while parsing messages from a connection.
///
/// Transport failures are kept apart from protocol failures on purpose:
/// a timed-out or reset socket says nothing about the validity of the
/// bytes parsed so far, and callers handle the two very differently
/// (timeouts are retryable, parse errors kill the connection).
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("parse error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("transport error: {source}")]
    Transport {
        #[from]
        source: io::Error,
    },
}

impl HttpError {
    /// True if this error is a deadline expiry on the transport.
    ///
    /// Timeouts never corrupt parser state; the same call can be retried
    /// and parsing continues exactly where it left off.
    pub fn is_timeout(&self) -> bool {
        match self {
            HttpError::Transport { source } => {
                matches!(source.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
            }
            HttpError::Parse { .. } => false,
        }
    }

    /// True if the peer went away at the transport level (reset, broken
    /// pipe, not connected). The server drive loop ends quietly on these
    /// instead of surfacing them as parse failures.
    pub fn is_disconnect(&self) -> bool {
        match self {
            HttpError::Transport { source } => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            HttpError::Parse { .. } => false,
        }
    }
}

/// Errors raised while turning the byte stream into messages.
#[derive(Error, Debug, Clone)]
pub enum ParseError {
    /// The tokenizer rejected the byte sequence. The native error code of
    /// the tokenizer is preserved via [`GrammarError::code`].
    #[error("grammar error {}: {source}", source.code())]
    Grammar {
        #[from]
        source: GrammarError,
    },

    /// The transport closed while a message was only partially received.
    /// Distinguished from a clean close so callers can log differently.
    #[error("unexpected end of input while a message was in flight")]
    UnexpectedEof,

    /// The request target passed the tokenizer's grammar check but failed
    /// structural decomposition.
    #[error("invalid request target: {reason}")]
    InvalidUri { reason: String },

    /// Status line decomposition failure (out-of-range code, bad reason).
    #[error("invalid status line: {reason}")]
    InvalidStatus { reason: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    /// An earlier parse error left the connection's byte stream at an
    /// indeterminate position; it cannot be resynchronized.
    #[error("parser is unusable after an earlier parse error")]
    Poisoned,
}

impl ParseError {
    pub fn invalid_uri<S: ToString>(reason: S) -> Self {
        Self::InvalidUri { reason: reason.to_string() }
    }

    pub fn invalid_status<S: ToString>(reason: S) -> Self {
        Self::InvalidStatus { reason: reason.to_string() }
    }

    pub fn invalid_header<S: ToString>(reason: S) -> Self {
        Self::InvalidHeader { reason: reason.to_string() }
    }

    pub fn invalid_body<S: ToString>(reason: S) -> Self {
        Self::InvalidBody { reason: reason.to_string() }
    }

    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }
}
