use std::fmt;
use std::io;

use bytes::Bytes;
use http::{HeaderMap, Version};

use crate::protocol::body::BodyStream;

/// Callback-style body: the callback is handed a writer and produces the
/// body bytes itself, returning how many it wrote. Used by callers that
/// build outgoing messages; the parser never produces this variant.
pub type BodyWriter = Box<dyn FnMut(&mut dyn io::Write) -> io::Result<u64>>;

/// The payload of a message.
///
/// This is a closed set: a body is either absent, fully buffered, lazily
/// pulled from the connection, or produced by a writer callback. The
/// parser always produces [`Body::Stream`].
pub enum Body {
    Empty,
    Buffer(Bytes),
    Stream(BodyStream),
    Writer(BodyWriter),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Consumes the body, returning the pull stream if that is what it holds.
    pub fn into_stream(self) -> Option<BodyStream> {
        match self {
            Body::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn as_stream_mut(&mut self) -> Option<&mut BodyStream> {
        match self {
            Body::Stream(stream) => Some(stream),
            _ => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Buffer(bytes) => f.debug_tuple("Body::Buffer").field(&bytes.len()).finish(),
            Body::Stream(stream) => f.debug_tuple("Body::Stream").field(stream).finish(),
            Body::Writer(_) => f.write_str("Body::Writer"),
        }
    }
}

/// Capability shared by [`Request`](crate::protocol::Request) and
/// [`Response`](crate::protocol::Response).
///
/// Headers and version are immutable once the message has been emitted by
/// the parser; the body keeps filling with chunks until the message is
/// complete on the wire. Repeated header fields have already been folded
/// into a single `", "`-joined value in arrival order.
pub trait Message {
    fn version(&self) -> Version;

    fn headers(&self) -> &HeaderMap;

    fn body(&self) -> &Body;

    fn body_mut(&mut self) -> &mut Body;

    fn into_body(self) -> Body;
}
