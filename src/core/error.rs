use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Wire,
    UnsupportedQuery,
    TypeMismatch,
    SegmentCorrupt,
    ShardTimeout,
    ShardUnreachable,
    OutOfRange,
    InvalidArgument,
    Internal,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error {
            kind,
            context: context.into(),
        }
    }

    pub fn unsupported_query(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::UnsupportedQuery, context)
    }

    pub fn type_mismatch(field: &str, expected: &str, got: &str) -> Self {
        Error::new(
            ErrorKind::TypeMismatch,
            format!("field '{}' expects {}, got {}", field, expected, got),
        )
    }

    pub fn corrupt(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::SegmentCorrupt, context)
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Internal, context)
    }

    /// Whether this error is a shard-level failure (eligible for the
    /// partial-results policy) rather than a request-level caller error.
    pub fn is_shard_failure(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::SegmentCorrupt | ErrorKind::ShardTimeout | ErrorKind::ShardUnreachable
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            context: err.to_string(),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error {
            kind: ErrorKind::Wire,
            context: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
