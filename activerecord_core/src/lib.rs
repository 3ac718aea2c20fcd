#![forbid(unsafe_code)]
//! Core building blocks for the `activerecord` data access layer.
//!
//! This crate is backend-agnostic. It defines the value types exchanged with a
//! database ([`SqlValue`], [`Row`]) and with application code ([`Native`]), the
//! [`Format`] conversion table between both worlds, the async [`Connection`]
//! seam implemented by backends, a [`Clock`] used for timestamps, and the shared
//! [`Error`] type.

pub use async_trait::async_trait;

pub mod clock;
pub mod connection;
pub mod format;
pub mod transactions;
pub mod value;

pub use clock::{Clock, FixedClock, SystemClock};
pub use connection::{ColumnInfo, Connection, Dialect, Placeholder};
pub use format::{Format, FormatError};
pub use value::{FromNative, Native, Properties, Row, SqlValue, Values};

/// Errors raised by DAOs, entity DAOs and models.
///
/// The variants follow the layers of the library: lookups (`NotFound`, `Find`),
/// writes (`Create`, `Update`, `Delete`), model and factory misuse, primary key
/// handling and value conversion. Driver failures are wrapped in `Backend`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No row matched, or a result set had an unexpected size.
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Find(String),
    #[error("{0}")]
    Create(String),
    #[error("{0}")]
    Update(String),
    #[error("{0}")]
    Delete(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("factory error: {0}")]
    Factory(String),
    /// Primary key is missing, incomplete, compound where a single key is required, or immutable.
    #[error("{0}")]
    PrimaryKey(String),
    #[error("column not found in data: {0}")]
    ColumnNotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Format(#[from] FormatError),
    /// Error while mapping a backend row into values.
    #[error("mapping error: {source}")]
    Mapping {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Opaque backend error from the underlying driver.
    #[error("backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Wrap a backend/driver error.
    pub fn backend<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Backend {
            source: Box::new(e),
        }
    }

    /// Wrap a row-mapping error.
    pub fn mapping<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Mapping {
            source: Box::new(e),
        }
    }

    /// Returns true for the "nothing found" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

/// Convenience alias for results returned throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn error_display_and_sources() {
        let e = Error::NotFound("No matching row found".into());
        assert_eq!(e.to_string(), "No matching row found");
        assert!(e.is_not_found());

        let e = Error::backend(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(e.to_string(), "backend error: boom");
        assert!(e.source().is_some());
        assert!(!e.is_not_found());

        let e = Error::mapping(std::io::Error::new(std::io::ErrorKind::Other, "bad row"));
        assert_eq!(e.to_string(), "mapping error: bad row");
        assert_eq!(e.source().map(|s| s.to_string()), Some("bad row".into()));
    }

    #[test]
    fn format_errors_convert() {
        let err: Error = "#.00".parse::<Format>().unwrap_err().into();
        assert!(matches!(err, Error::Format(FormatError::UnknownFormat(_))));
        assert!(err.to_string().contains("#.00"));
    }

    #[test]
    fn model_family_messages() {
        assert_eq!(
            Error::Update("Permission denied".into()).to_string(),
            "Permission denied"
        );
        assert_eq!(
            Error::PrimaryKey("No primary id set".into()).to_string(),
            "No primary id set"
        );
    }
}
