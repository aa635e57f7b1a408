//! Error types for fleet operations
//!
//! Errors carry the path, port or template involved so a failed render or
//! reconcile can be traced back to the file that caused it.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for fleet operations
#[derive(Debug, Error)]
pub enum Error {
    /// File system failure (directory creation, read, write, lock)
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// Path being accessed when the failure happened
        path: PathBuf,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },

    /// Requested port is already owned by another application
    #[error("port {port} is already in use by {owner} (requested by {requested_by})")]
    PortConflict {
        /// The contested port
        port: u16,
        /// Application currently holding the port
        owner: String,
        /// Application that asked for it
        requested_by: String,
    },

    /// Every port in the allocation range is taken
    #[error("no available ports in the range {start}-{end}")]
    NoCapacity {
        /// First port of the range
        start: u16,
        /// Last port of the range (inclusive)
        end: u16,
    },

    /// Malformed template or ingress document
    #[error("failed to parse {}: {message}", path.display())]
    Parse {
        /// Document being parsed
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Template tagged with a category that is not Base, Application or Common
    #[error("invalid category '{category}' for template {template}")]
    InvalidCategory {
        /// Template name
        template: String,
        /// The unrecognised tag
        category: String,
    },

    /// Target document does not exist
    #[error("not found: {}", path.display())]
    NotFound {
        /// Missing path
        path: PathBuf,
    },

    /// Placeholder substitution failed
    #[error("error rendering template {template}: {source}")]
    Template {
        /// Template name
        template: String,
        /// The underlying minijinja error
        #[source]
        source: minijinja::Error,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Where the error occurred (e.g. "renderer")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid descriptor or template definition
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },
}

impl Error {
    /// Create an io error bound to the path that failed
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a parse error for a document
    pub fn parse(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a port conflict
    pub fn is_port_conflict(&self) -> bool {
        matches!(self, Self::PortConflict { .. })
    }
}

/// Attach a path to bare io results.
pub(crate) trait IoResultExt<T> {
    /// Map an io error into [`Error::Io`] for `path`
    fn at(self, path: &Path) -> crate::Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> crate::Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
