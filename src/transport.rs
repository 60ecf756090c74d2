//! The byte-stream collaborator underneath the parser.
//!
//! The parser performs no socket or TLS logic itself; everything it knows
//! about I/O is the [`Transport`] trait: deadline-bounded reads and a
//! close. A read of zero bytes means the peer closed the stream in an
//! orderly way. Deadline expiry is reported as `TimedOut` and is always
//! retryable; it never corrupts parser state.

use std::io;
use std::io::Read;
use std::net::{Shutdown, TcpStream};
use std::time::Instant;

/// Source of input bytes for a parser.
pub trait Transport {
    /// Reads up to `buf.len()` bytes, blocking no later than `deadline`.
    ///
    /// Returns `Ok(0)` only on an orderly close. A deadline in the past
    /// fails immediately with `TimedOut`.
    fn read(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> io::Result<usize>;

    fn close(&mut self) -> io::Result<()>;
}

/// [`Transport`] over a `std::net::TcpStream`, mapping deadlines onto the
/// socket's read timeout.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> io::Result<usize> {
        let timeout = match deadline {
            Some(deadline) => {
                let remaining = deadline.checked_duration_since(Instant::now());
                match remaining {
                    Some(remaining) if !remaining.is_zero() => Some(remaining),
                    _ => return Err(io::ErrorKind::TimedOut.into()),
                }
            }
            None => None,
        };
        self.stream.set_read_timeout(timeout)?;
        match self.stream.read(buf) {
            // platforms disagree on which kind a read timeout produces
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(io::ErrorKind::TimedOut.into()),
            result => result,
        }
    }

    fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }
}

/// [`Transport`] over any in-memory reader. Deadlines are ignored because
/// the reader never blocks; useful for parsing recorded byte streams.
#[derive(Debug)]
pub struct ReaderTransport<R> {
    reader: R,
}

impl<R: Read> ReaderTransport<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read> Transport for ReaderTransport<R> {
    fn read(&mut self, buf: &mut [u8], _deadline: Option<Instant>) -> io::Result<usize> {
        self.reader.read(buf)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Transport;
    use std::cmp;
    use std::collections::VecDeque;
    use std::io;
    use std::time::Instant;

    enum Step {
        Data(Vec<u8>),
        Timeout,
        Error(io::ErrorKind),
    }

    /// A transport that replays a fixed script of reads, then reports an
    /// orderly close. Lets tests control exactly how the byte stream is
    /// fragmented and where failures happen.
    pub(crate) struct ScriptedTransport {
        steps: VecDeque<Step>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self { steps: VecDeque::new() }
        }

        pub(crate) fn data(mut self, bytes: &[u8]) -> Self {
            self.steps.push_back(Step::Data(bytes.to_vec()));
            self
        }

        pub(crate) fn timeout(mut self) -> Self {
            self.steps.push_back(Step::Timeout);
            self
        }

        pub(crate) fn error(mut self, kind: io::ErrorKind) -> Self {
            self.steps.push_back(Step::Error(kind));
            self
        }
    }

    impl Transport for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8], _deadline: Option<Instant>) -> io::Result<usize> {
            match self.steps.pop_front() {
                None => Ok(0),
                Some(Step::Data(mut data)) => {
                    let n = cmp::min(buf.len(), data.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        data.drain(..n);
                        self.steps.push_front(Step::Data(data));
                    }
                    Ok(n)
                }
                Some(Step::Timeout) => Err(io::ErrorKind::TimedOut.into()),
                Some(Step::Error(kind)) => Err(kind.into()),
            }
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
