//! Error types for catalog mirroring.
//!
//! Every stage of a mirror run reports failures through [`MirrorError`].  Some of them are fatal
//! and end the run immediately; others are collected into an [`ErrorList`] and handed back next to
//! the best-effort result.
//!
//! # Error Categories
//!
//! - **Fatal**: [`Configuration`], [`DatabaseExtraction`], [`DatabaseOpen`], [`RecordSetRead`],
//!   [`DocumentEncoding`], [`Io`], [`Settings`]
//! - **Non-fatal** (accumulated): [`RecordScan`], [`ReferenceParse`], [`MirrorInvocation`]
//!
//! [`Configuration`]: MirrorError::Configuration
//! [`DatabaseExtraction`]: MirrorError::DatabaseExtraction
//! [`DatabaseOpen`]: MirrorError::DatabaseOpen
//! [`RecordSetRead`]: MirrorError::RecordSetRead
//! [`DocumentEncoding`]: MirrorError::DocumentEncoding
//! [`Io`]: MirrorError::Io
//! [`Settings`]: MirrorError::Settings
//! [`RecordScan`]: MirrorError::RecordScan
//! [`ReferenceParse`]: MirrorError::ReferenceParse
//! [`MirrorInvocation`]: MirrorError::MirrorInvocation

use std::{fmt, path::PathBuf};

use crate::reference::ReferenceError;

/// Result type alias for operations that may return a MirrorError.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Error types for mirror operations.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// A required dependency or parameter is missing.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The database extractor could not produce a catalog database.
    #[error("failed to extract catalog database from {image}: {reason:#}")]
    DatabaseExtraction {
        image: String,
        reason: anyhow::Error,
    },

    /// The extracted catalog database could not be opened.
    #[error("failed to open catalog database {}: {source}", path.display())]
    DatabaseOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A single record could not be decoded.  The scan carries on.
    #[error("failed to scan record from {table}.{column}: {source}")]
    RecordScan {
        table: &'static str,
        column: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A whole record set could not be read.
    #[error("failed to read {table}.{column}: {source}")]
    RecordSetRead {
        table: &'static str,
        column: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// An image string did not match the reference grammar and was skipped.
    #[error("couldn't parse image for mirroring ({image}), skipping mirror: {source}")]
    ReferenceParse {
        image: String,
        #[source]
        source: ReferenceError,
    },

    /// The image mirrorer reported a failure for the batch.
    #[error("mirroring failed: {reason:#}")]
    MirrorInvocation { reason: anyhow::Error },

    /// The image content source policy could not be serialized.
    #[error("failed to encode image content source policy: {0}")]
    DocumentEncoding(#[from] serde_yaml_ng::Error),

    /// I/O error while writing manifests.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid TOML or has unexpected fields.
    #[error("invalid settings file: {0}")]
    Settings(#[from] toml::de::Error),

    /// Several errors collected during one run.
    #[error("{0}")]
    Aggregate(ErrorList),
}

/// An ordered collection of errors gathered while a run continues past non-fatal failures.
///
/// An empty list means success.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<MirrorError>);

impl ErrorList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error, keeping collection order.
    pub fn push(&mut self, error: MirrorError) {
        self.0.push(error);
    }

    /// Append every error from `other`.
    pub fn extend(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MirrorError> {
        self.0.iter()
    }

    /// `Ok(())` when nothing was collected, otherwise the whole list as one
    /// [`MirrorError::Aggregate`].
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(MirrorError::Aggregate(self))
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl From<MirrorError> for ErrorList {
    fn from(error: MirrorError) -> Self {
        Self(vec![error])
    }
}

impl IntoIterator for ErrorList {
    type Item = MirrorError;
    type IntoIter = std::vec::IntoIter<MirrorError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a MirrorError;
    type IntoIter = std::slice::Iter<'a, MirrorError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
