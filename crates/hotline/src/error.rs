//! Error type shared by the wire codec, the stores, and the connection handler.

use std::{fmt, io};

/// Numeric codes used when a failure needs to travel as something other than
/// free text, e.g. when a `FileStore` implementation reports why a filesystem
/// call failed. Not wire error codes: `Transaction.ErrorCode` on the wire is
/// a plain non-zero flag, not one of these.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const EACCES: i32 = 13;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ENOTEMPTY: i32 = 39;
    pub const EPROTO: i32 = 71;
    pub const EOPNOTSUPP: i32 = 95;
}

#[derive(Debug)]
pub enum Error {
    /// A bare numeric code, used where no further context is available.
    No(i32),
    Io(io::Error),
    /// Malformed or unnegotiable wire data: bad handshake, truncated frame,
    /// a field that doesn't parse. Always fatal to the connection.
    Protocol(String),
    /// Login failed: unknown account or password mismatch.
    Authentication,
    /// Caller lacks the access bit a handler requires; the connection stays open.
    Denied(String),
}

impl Error {
    pub fn errno(&self) -> i32 {
        match self {
            Error::No(n) => *n,
            Error::Io(e) => e.raw_os_error().unwrap_or(errno::EIO),
            Error::Protocol(_) => errno::EPROTO,
            Error::Authentication => errno::EACCES,
            Error::Denied(_) => errno::EACCES,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::No(n) => write!(f, "error {}", n),
            Error::Io(e) => write!(f, "{}", e),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::Authentication => write!(f, "Incorrect login."),
            Error::Denied(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}
