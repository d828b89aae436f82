//! Error types for the boot-time TCP client, covering transport failures,
//! header parsing, and connection-level conditions.

use std::{error, fmt, io, result};

use crate::protocol::SocketAddr;

/// A convenience wrapper around `Result` for [crate::Error].
pub type Result<T> = result::Result<T, Error>;

/// Set of errors that can occur while driving a TCP connection.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The transport failed to send a datagram.
    Io(io::Error),
    /// An incoming segment could not be parsed.
    Parse(ParseError),
    /// Storage for a segment payload could not be allocated, or a present but
    /// empty payload was supplied.
    OutOfMemory,
    /// Another connection is already bound to the local socket address.
    AddrInUse(SocketAddr),
    /// A blocking operation did not complete before its deadline.
    TimedOut,
    /// The caller supplied an argument the operation cannot accept.
    InvalidArgument(&'static str),
    /// The connection has not completed its handshake.
    NotConnected,
    /// `connect` was called on a connection that already left `INITIAL`.
    AlreadyConnected,
    /// The peer answered the connection request with a reset.
    ConnectionRefused,
    /// The peer has finished sending and no more data will arrive.
    ConnectionClosed,
}

impl Error {
    /// Returns `true` if the error is a timeout, after which the caller may
    /// retry the operation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref err) => Some(err),
            Error::Parse(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match err {
            Error::Io(err) => return err,
            Error::Parse(_) => io::ErrorKind::InvalidData,
            Error::OutOfMemory => io::ErrorKind::OutOfMemory,
            Error::AddrInUse(_) => io::ErrorKind::AddrInUse,
            Error::TimedOut => io::ErrorKind::TimedOut,
            Error::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            Error::NotConnected => io::ErrorKind::NotConnected,
            Error::AlreadyConnected => io::ErrorKind::AlreadyExists,
            Error::ConnectionRefused => io::ErrorKind::ConnectionRefused,
            Error::ConnectionClosed => io::ErrorKind::UnexpectedEof,
        };

        io::Error::new(kind, err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref err) => fmt::Display::fmt(err, f),
            Error::Parse(ref err) => fmt::Display::fmt(err, f),
            Error::OutOfMemory => write!(f, "failed to allocate segment storage"),
            Error::AddrInUse(addr) => write!(f, "local address already in use: {addr}"),
            Error::TimedOut => write!(f, "operation timed out"),
            Error::InvalidArgument(what) => write!(f, "invalid argument: {what}"),
            Error::NotConnected => write!(f, "connection is not established"),
            Error::AlreadyConnected => write!(f, "connection was already opened"),
            Error::ConnectionRefused => write!(f, "connection refused by peer (RST)"),
            Error::ConnectionClosed => write!(f, "peer closed the connection"),
        }
    }
}

/// Error occurred while trying to parse a TCP segment.
#[derive(Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ParseError {
    /// Input buffer shorter than the minimum TCP header.
    InvalidBufferLength { provided: usize, min: u16 },
    /// Invalid TCP data offset.
    InvalidDataOffset { provided: u16, min: u16, max: u16 },
    /// Mismatch between the provided and expected TCP header length.
    ///
    /// Value provided is less than `data_offset << 2`.
    HeaderLengthMismatch { provided: usize, expected: u16 },
}

impl error::Error for ParseError {}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ParseError::InvalidBufferLength { provided, min } => {
                write!(
                    f,
                    "invalid segment length: {provided} bytes (less than minimum header length {min} bytes)"
                )
            }
            ParseError::InvalidDataOffset { provided, min, max } => {
                write!(
                    f,
                    "invalid TCP data offset: {provided} (not within the valid range: {min}..={max})"
                )
            }
            ParseError::HeaderLengthMismatch { provided, expected } => {
                write!(
                    f,
                    "invalid TCP header length: {provided} bytes (less than indicated by data offset: {expected} bytes)"
                )
            }
        }
    }
}
