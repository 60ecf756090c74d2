use http::{HeaderMap, Method, Version};

use crate::protocol::message::{Body, Message};
use crate::protocol::uri::Uri;

/// A parsed HTTP request.
///
/// Constructed exactly once, when the header section has been fully
/// received; the body stream it carries keeps filling until the message
/// is complete on the wire.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Body,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        uri: Uri,
        version: Version,
        headers: HeaderMap,
        body: Body,
    ) -> Self {
        Self { method, uri, version, headers, body }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl Message for Request {
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
