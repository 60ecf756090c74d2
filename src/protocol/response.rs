use http::{HeaderMap, StatusCode, Version};

use crate::protocol::message::{Body, Message};

/// A parsed HTTP response.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    reason: String,
    version: Version,
    headers: HeaderMap,
    body: Body,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        reason: String,
        version: Version,
        headers: HeaderMap,
        body: Body,
    ) -> Self {
        Self { status, reason, version, headers, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The free-text reason phrase as sent by the peer, which may be empty
    /// and need not match the canonical phrase for the status code.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Message for Response {
    fn version(&self) -> Version {
        self.version
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn body(&self) -> &Body {
        &self.body
    }

    fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    fn into_body(self) -> Body {
        self.body
    }
}
