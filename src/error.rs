//! Error types shared by every socket operation.
//!
//! Handle primitives come in two call conventions: a `*_code` form that
//! reports failure through an [`ErrorCode`] out-parameter and never fails,
//! and a `Result` form built on top of it that turns a non-zero code into
//! [`Error::System`].

use std::{error, fmt, io, result};

/// A convenience wrapper around `Result` for `socketry::Error`.
pub type Result<T> = result::Result<T, Error>;

/// Platform error code reported by a socket call. Zero means success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCode(i32);

impl ErrorCode {
    /// Code for a successful call.
    pub const fn success() -> Self {
        ErrorCode(0)
    }

    /// Wrap a raw OS error number.
    pub const fn from_raw(code: i32) -> Self {
        ErrorCode(code)
    }

    /// Capture the calling thread's last OS error.
    pub fn last_os_error() -> Self {
        Self::from_io(&io::Error::last_os_error())
    }

    /// Capture the OS error carried by an `io::Error`.
    ///
    /// Errors without an OS code (e.g. invalid input synthesized by std)
    /// map to `EINVAL`.
    pub fn from_io(err: &io::Error) -> Self {
        ErrorCode(err.raw_os_error().unwrap_or(libc::EINVAL))
    }

    /// Record `err` into this code.
    pub fn assign(&mut self, err: &io::Error) {
        *self = Self::from_io(err);
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn raw(&self) -> i32 {
        self.0
    }

    pub fn is_err(&self) -> bool {
        self.0 != 0
    }

    /// Human-readable message for the code, as rendered by the platform.
    pub fn message(&self) -> String {
        if self.0 == 0 {
            return "success".to_string();
        }
        io::Error::from_raw_os_error(self.0).to_string()
    }

    /// Convert into the raising convention: a non-zero code becomes
    /// [`Error::System`] tagged with the name of the failing call.
    pub fn check(self, op: &'static str) -> Result<()> {
        if self.is_err() {
            Err(Error::System { op, code: self })
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (os error {})", self.message(), self.0)
    }
}

/// Set of errors that can occur while driving a socket.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An OS-level socket call failed.
    System {
        /// Name of the failing call (`bind`, `listen`, ...).
        op: &'static str,
        code: ErrorCode,
    },
    /// A precondition of the API was violated by the caller.
    ProtocolMisuse(&'static str),
    /// An address literal that is not dotted-decimal IPv4.
    InvalidAddress(String),
    /// The peer shut the connection down during the named transfer.
    PeerClosed(&'static str),
}

impl Error {
    /// OS error code, if this is a system error.
    pub fn code(&self) -> Option<ErrorCode> {
        match *self {
            Error::System { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether this is a system error with the given errno.
    pub fn is_os(&self, errno: i32) -> bool {
        self.code().map(|c| c.raw() == errno).unwrap_or(false)
    }

    pub(crate) fn system(op: &'static str, err: &io::Error) -> Error {
        Error::System {
            op,
            code: ErrorCode::from_io(err),
        }
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::System { op, ref code } => write!(f, "{op}: {code}"),
            Error::ProtocolMisuse(what) => write!(f, "protocol misuse: {what}"),
            Error::InvalidAddress(ref addr) => write!(f, "invalid IPv4 address '{addr}'"),
            Error::PeerClosed(op) => write!(f, "{op}: connection closed by peer"),
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::System { code, .. } => io::Error::from_raw_os_error(code.raw()),
            Error::PeerClosed(op) => io::Error::new(io::ErrorKind::UnexpectedEof, op),
            other => io::Error::new(io::ErrorKind::InvalidInput, other.to_string()),
        }
    }
}
