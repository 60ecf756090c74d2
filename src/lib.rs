//! A pull-based HTTP/1.1 message parsing engine for synchronous,
//! deadline-bounded I/O.
//!
//! The engine inverts the usual push-parser shape: callers *pull* parsed
//! messages out of a connection with [`connection::MessageParser::read_next`],
//! and pull body bytes out of each message's [`protocol::body::BodyStream`].
//! Internally a byte-level [`tokenizer`] pushes events into a per-message
//! accumulator; the bridge between the two worlds is a plain synchronous
//! call stack, so a body read re-enters the parser directly and nothing is
//! buffered beyond one transport read.
//!
//! Properties the engine maintains:
//!
//! - **Streaming heads.** A message is handed out as soon as its header
//!   section is parsed, before any body byte is read from the transport.
//! - **Bounded memory.** A paused body holds at most one read buffer's
//!   worth of unconsumed bytes, independent of body size.
//! - **Pipelining.** Messages that arrive back-to-back in one transport
//!   read are queued and drained before the transport is read again.
//! - **Retryable timeouts.** Every blocking call takes an optional
//!   deadline; expiry is a clean cancellation that leaves the parser
//!   exactly where it was.
//!
//! Both directions are covered: a [`connection::RequestParser`] decodes
//! requests on a server, a [`connection::ResponseParser`] decodes
//! responses on a client.
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpListener;
//! use std::time::Duration;
//!
//! use pull_http::connection::RequestParser;
//! use pull_http::protocol::Message;
//! use pull_http::transport::TcpTransport;
//! use tracing::{error, info};
//!
//! fn main() -> std::io::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080")?;
//!     for stream in listener.incoming() {
//!         let transport = TcpTransport::new(stream?);
//!         let mut parser = RequestParser::new(transport);
//!         let result = parser.drive(Duration::from_secs(30), |mut request| {
//!             info!(uri = %request.uri(), "request");
//!             if let Some(body) = request.body_mut().as_stream_mut() {
//!                 let mut buf = [0u8; 4096];
//!                 while body.read(&mut buf, None)? > 0 {}
//!             }
//!             Ok(())
//!         });
//!         if let Err(err) = result {
//!             error!(cause = %err, "connection failed");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod protocol;
pub mod tokenizer;
pub mod transport;

mod codec;
mod utils;

pub(crate) use utils::ensure;
