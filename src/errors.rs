/// The error type for every fallible operation on a zip archive or one of
/// its open readers.
#[derive(Debug)]
pub struct Error {
    inner: ErrorInner,
}

impl Error {
    pub(crate) fn io(err: std::io::Error) -> Error {
        Error::from(ErrorKind::Io(err))
    }

    pub(crate) fn utf8(err: std::str::Utf8Error) -> Error {
        Error::from(ErrorKind::InvalidUtf8(err))
    }

    pub(crate) fn corrupt(what: &'static str) -> Error {
        Error::from(ErrorKind::Corrupt(what))
    }

    /// The kind of failure that occurred.
    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }
}

#[derive(Debug)]
struct ErrorInner {
    kind: ErrorKind,
}

/// Failure categories surfaced by the archive back-end.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A mutating operation was attempted; zip archives are always read-only.
    ReadOnly,
    /// No entry exists at the given path.
    NotFound,
    /// A seek was issued beyond the end of an entry's data.
    PastEof,
    /// The archive violates the zip format; the payload names the check that
    /// failed.
    Corrupt(&'static str),
    /// No end of central directory record within the scan budget, so the
    /// stream is not a zip archive this back-end can read.
    Unsupported,
    /// Password verification failed, a password was missing, or one was
    /// supplied for an unencrypted entry.
    BadPassword,
    /// A chain of symlinks returned to an entry already being resolved.
    SymlinkLoop,
    /// An entry name or symlink target was not valid UTF-8.
    InvalidUtf8(std::str::Utf8Error),
    /// The underlying byte source failed.
    Io(std::io::Error),
    /// A record was truncated.
    Eof,
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.inner.kind {
            ErrorKind::Io(ref err) => Some(err),
            ErrorKind::InvalidUtf8(ref err) => Some(err),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.inner.kind)?;
        Ok(())
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ErrorKind::ReadOnly => {
                write!(f, "Archive is read-only")
            }
            ErrorKind::NotFound => {
                write!(f, "Entry not found")
            }
            ErrorKind::PastEof => {
                write!(f, "Seek past end of entry data")
            }
            ErrorKind::Corrupt(what) => {
                write!(f, "Corrupt archive: {}", what)
            }
            ErrorKind::Unsupported => {
                write!(f, "Missing end of central directory")
            }
            ErrorKind::BadPassword => {
                write!(f, "Password verification failed")
            }
            ErrorKind::SymlinkLoop => {
                write!(f, "Infinite symlink loop")
            }
            ErrorKind::InvalidUtf8(ref err) => {
                write!(f, "Invalid UTF-8: {}", err)
            }
            ErrorKind::Io(ref err) => err.fmt(f),
            ErrorKind::Eof => {
                write!(f, "Unexpected end of record")
            }
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: ErrorInner { kind },
        }
    }
}
