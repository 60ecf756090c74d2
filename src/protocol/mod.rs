//! Message data model: requests, responses, bodies, targets and errors.
//!
//! A parsed message is immutable with respect to its headers from the
//! moment it is emitted; its [`body::BodyStream`] keeps filling with
//! chunks until the message is complete on the wire. Both directions
//! share the [`Message`] capability.

mod message;
pub use message::Body;
pub use message::BodyWriter;
pub use message::Message;

mod request;
pub use request::Request;

mod response;
pub use response::Response;

mod error;
pub use error::HttpError;
pub use error::ParseError;

mod uri;
pub use uri::Uri;
pub use uri::UserInfo;

pub mod body;
