//! Connection-level parsing: the pull loop over a [`crate::transport::Transport`].
//!
//! A [`MessageParser`] owns the transport, the tokenizer and the
//! per-message accumulator, and exposes the whole engine as a pull API:
//! [`MessageParser::read_next`] returns the next complete message head,
//! and each message carries a body stream that pulls the rest of the
//! bytes on demand. The same parser type serves both directions through
//! the [`Direction`] trait.

mod direction;
mod parser;

pub use direction::Direction;
pub use direction::RequestDirection;
pub use direction::ResponseDirection;

pub use parser::MessageParser;
pub use parser::ParserConfig;
pub use parser::RequestParser;
pub use parser::ResponseParser;
