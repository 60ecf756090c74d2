use http::{HeaderMap, StatusCode};

use crate::protocol::{Body, ParseError, Request, Response, Uri};
use crate::tokenizer::{Kind, TokenizedHead};
use crate::ensure;

mod sealed {
    pub trait Sealed {}
}

/// Which side of the protocol a parser decodes.
///
/// Implemented only by [`RequestDirection`] and [`ResponseDirection`]; the
/// trait exists so one parser implementation covers both message types.
pub trait Direction: sealed::Sealed + 'static {
    /// The message type this direction produces.
    type Message: 'static;

    #[doc(hidden)]
    const KIND: Kind;

    /// Assembles a typed message from the tokenized start line and the
    /// accumulated head. Failures here are decomposition errors scoped to
    /// this message.
    #[doc(hidden)]
    fn assemble(
        head: &TokenizedHead,
        headers: HeaderMap,
        uri: Option<Uri>,
        reason: Option<String>,
        body: Body,
    ) -> Result<Self::Message, ParseError>;
}

/// Decodes requests, as a server would.
#[derive(Debug, Clone, Copy)]
pub enum RequestDirection {}

impl sealed::Sealed for RequestDirection {}

impl Direction for RequestDirection {
    type Message = Request;

    const KIND: Kind = Kind::Request;

    fn assemble(
        head: &TokenizedHead,
        headers: HeaderMap,
        uri: Option<Uri>,
        reason: Option<String>,
        body: Body,
    ) -> Result<Request, ParseError> {
        debug_assert!(reason.is_none());
        let method = head
            .method
            .clone()
            .ok_or_else(|| ParseError::invalid_header("request is missing a method"))?;
        let uri =
            uri.ok_or_else(|| ParseError::invalid_uri("request is missing a target"))?;
        Ok(Request::new(method, uri, head.version, headers, body))
    }
}

/// Decodes responses, as a client would.
#[derive(Debug, Clone, Copy)]
pub enum ResponseDirection {}

impl sealed::Sealed for ResponseDirection {}

impl Direction for ResponseDirection {
    type Message = Response;

    const KIND: Kind = Kind::Response;

    fn assemble(
        head: &TokenizedHead,
        headers: HeaderMap,
        _uri: Option<Uri>,
        reason: Option<String>,
        body: Body,
    ) -> Result<Response, ParseError> {
        ensure!(
            (100..=599).contains(&head.status),
            ParseError::invalid_status(format!("status code {} out of range", head.status))
        );
        let status = StatusCode::from_u16(head.status).map_err(|_| {
            ParseError::invalid_status(format!("status code {} is not representable", head.status))
        })?;
        Ok(Response::new(status, reason.unwrap_or_default(), head.version, headers, body))
    }
}
