use std::borrow::Cow;
use std::{error, fmt, result};

/// Type alias for convenience when using the Result type with our error.
pub type ReplResult<T> = result::Result<T, ReplError>;

/// Classification of replication errors.
///
/// Every error surfaced to the coordinator is terminal; the kinds exist so
/// that callers can report precisely what failed and so tests can assert on
/// failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Configuration was structurally valid but semantically unusable.
    ConfigError,
    /// Connecting to the source database failed.
    SourceConnectionFailed,
    /// Connecting to or pinging the destination database failed.
    DestinationConnectionFailed,
    /// A configured table does not have `FULL` replica identity.
    ReplicaIdentityNotFull,
    /// A catalog query did not return the expected shape.
    SourceSchemaError,
    /// Creating or dropping a replication slot failed.
    ReplicationSlotError,
    /// The initial table copy failed.
    SyncFailed,
    /// A replication stream frame could not be decoded.
    DecodeFailed,
    /// A value could not be converted between representations.
    ConversionError,
    /// Flushing a batch to the destination failed.
    FlushFailed,
    /// An internal invariant was violated.
    InvalidState,
    /// An error that does not fit the other categories.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConfigError => "config error",
            ErrorKind::SourceConnectionFailed => "source connection failed",
            ErrorKind::DestinationConnectionFailed => "destination connection failed",
            ErrorKind::ReplicaIdentityNotFull => "replica identity not full",
            ErrorKind::SourceSchemaError => "source schema error",
            ErrorKind::ReplicationSlotError => "replication slot error",
            ErrorKind::SyncFailed => "sync failed",
            ErrorKind::DecodeFailed => "decode failed",
            ErrorKind::ConversionError => "conversion error",
            ErrorKind::FlushFailed => "flush failed",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

struct ErrorInner {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<String>,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

/// A stable error type for the replication library.
///
/// Boxing keeps the public type one pointer wide so the success path of
/// [`ReplResult`] stays cheap.
pub struct ReplError(Box<ErrorInner>);

impl ReplError {
    /// Creates a new error with the specified kind and description.
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        ReplError(Box::new(ErrorInner {
            kind,
            description: description.into(),
            detail: None,
            source: None,
        }))
    }

    /// Attaches a dynamic detail string to the error.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.0.detail = Some(detail.into());
        self
    }

    /// Attaches a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        self.0.source = Some(source.into());
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.0.kind
    }

    /// Returns the attached detail, if any.
    pub fn detail(&self) -> Option<&str> {
        self.0.detail.as_deref()
    }
}

impl fmt::Debug for ReplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplError")
            .field("kind", &self.0.kind)
            .field("description", &self.0.description)
            .field("detail", &self.0.detail)
            .field("source", &self.0.source)
            .finish()
    }
}

impl fmt::Display for ReplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.description)?;
        if let Some(detail) = &self.0.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

impl error::Error for ReplError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0
            .source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn error::Error + 'static))
    }
}

impl From<(ErrorKind, &'static str)> for ReplError {
    fn from((kind, description): (ErrorKind, &'static str)) -> Self {
        ReplError::new(kind, description)
    }
}

impl From<(ErrorKind, &'static str, String)> for ReplError {
    fn from((kind, description, detail): (ErrorKind, &'static str, String)) -> Self {
        ReplError::new(kind, description).with_detail(detail)
    }
}

impl From<tokio_postgres::Error> for ReplError {
    fn from(err: tokio_postgres::Error) -> Self {
        let description = err.to_string();

        if err.as_db_error().is_some() {
            ReplError::new(ErrorKind::SourceSchemaError, "postgres query failed")
                .with_detail(description)
                .with_source(err)
        } else {
            ReplError::new(ErrorKind::SourceConnectionFailed, "postgres connection error")
                .with_detail(description)
                .with_source(err)
        }
    }
}

impl From<std::str::Utf8Error> for ReplError {
    fn from(err: std::str::Utf8Error) -> Self {
        ReplError::new(ErrorKind::ConversionError, "invalid utf-8 in tuple data").with_source(err)
    }
}

impl From<std::num::ParseIntError> for ReplError {
    fn from(err: std::num::ParseIntError) -> Self {
        ReplError::new(ErrorKind::ConversionError, "integer parsing failed")
            .with_detail(err.to_string())
            .with_source(err)
    }
}

impl From<std::num::ParseFloatError> for ReplError {
    fn from(err: std::num::ParseFloatError) -> Self {
        ReplError::new(ErrorKind::ConversionError, "float parsing failed")
            .with_detail(err.to_string())
            .with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = ReplError::new(ErrorKind::FlushFailed, "flush failed")
            .with_detail("table orders: connection refused");
        assert_eq!(err.to_string(), "flush failed: table orders: connection refused");
    }

    #[test]
    fn kind_is_preserved() {
        let err: ReplError = (ErrorKind::ReplicaIdentityNotFull, "identity not full").into();
        assert_eq!(err.kind(), ErrorKind::ReplicaIdentityNotFull);
    }

    #[test]
    fn source_chain_is_exposed() {
        use std::error::Error;

        let io = std::io::Error::other("boom");
        let err = ReplError::new(ErrorKind::Unknown, "wrapped").with_source(io);
        assert!(err.source().is_some());
    }
}
