//! Incremental parse state tracking and per-message accumulation.
//!
//! The tokenizer fires one event per pushed chunk per logical field, so a
//! single field may arrive in many pieces. The [`Context`] turns those
//! pieces back into typed values with a flush-then-start protocol: the
//! scratch buffer for the previous field is closed out exactly once, at the
//! moment the tokenizer announces the next field, no matter how many chunks
//! the previous one took.

mod context;

pub(crate) use context::Context;
pub(crate) use context::ParseState;
