//! Error types for the rendering pipeline.
//!
//! Every failure inside the pipeline surfaces as a single [`RenderError`]
//! carrying a kind, a message, optional parameter annotations and the error it
//! wraps. Callers add context with [`ResultExt::trace`] while the original
//! cause stays reachable through [`std::error::Error::source`].

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias using RenderError.
pub type RenderResult<T> = Result<T, RenderError>;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Unknown key, missing key, conflicting keys or out-of-range setting.
    Config,
    /// Required data missing, empty raster or mismatched array sizes.
    Data,
    /// Duplicate IRI or duplicate registry name.
    Uniqueness,
    /// Coordinate transformation could not be constructed.
    Transform,
    /// Reading or writing files.
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigurationError",
            ErrorKind::Data => "DataError",
            ErrorKind::Uniqueness => "UniquenessError",
            ErrorKind::Transform => "TransformError",
            ErrorKind::Io => "IoError",
            ErrorKind::Internal => "InternalError",
        }
    }

    /// Process exit code used by command line front ends.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::Config => 2,
            ErrorKind::Data => 3,
            ErrorKind::Uniqueness => 4,
            ErrorKind::Transform => 5,
            ErrorKind::Io => 6,
            ErrorKind::Internal => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary error type for rendering operations.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RenderError {
    kind: ErrorKind,
    message: String,
    params: Vec<(String, String)>,
    #[source]
    cause: Option<Box<RenderError>>,
}

impl RenderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            params: Vec::new(),
            cause: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Data, message)
    }

    pub fn uniqueness(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Uniqueness, message)
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transform, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach a named parameter to this error.
    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    /// Wrap this error with an outer context message.
    ///
    /// The wrapper inherits the kind so that callers matching on
    /// [`RenderError::kind`] see the original classification.
    pub fn trace(self, message: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            message: message.into(),
            params: Vec::new(),
            cause: Some(Box::new(self)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Look up a parameter anywhere in the chain, outermost first.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.chain()
            .flat_map(|e| e.params.iter())
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The wrapped error, if any.
    pub fn cause(&self) -> Option<&RenderError> {
        self.cause.as_deref()
    }

    /// The innermost error of the chain.
    pub fn root(&self) -> &RenderError {
        let mut current = self;
        while let Some(next) = current.cause() {
            current = next;
        }
        current
    }

    /// Iterate the chain from outermost to innermost.
    pub fn chain(&self) -> impl Iterator<Item = &RenderError> {
        std::iter::successors(Some(self), |e| e.cause())
    }

    /// Multi-line description of the whole chain including parameters.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for (depth, err) in self.chain().enumerate() {
            if depth > 0 {
                out.push('\n');
            }
            out.push_str(&"  ".repeat(depth));
            out.push_str(&err.message);
            for (name, value) in &err.params {
                out.push_str(&format!("\n{}  {} = {}", "  ".repeat(depth), name, value));
            }
        }
        out
    }
}

/// Context helpers for results carrying a [`RenderError`].
pub trait ResultExt<T> {
    /// Wrap the error with an outer context message.
    fn trace(self, message: impl Into<String>) -> RenderResult<T>;

    /// Annotate the error with a named parameter.
    fn with_param(self, name: &str, value: impl ToString) -> RenderResult<T>;
}

impl<T> ResultExt<T> for RenderResult<T> {
    fn trace(self, message: impl Into<String>) -> RenderResult<T> {
        self.map_err(|e| e.trace(message))
    }

    fn with_param(self, name: &str, value: impl ToString) -> RenderResult<T> {
        self.map_err(|e| e.with_param(name, value))
    }
}

// Conversion from common error types
impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::new(ErrorKind::Io, err.to_string())
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::config(format!("JSON error: {}", err))
    }
}

impl From<crate::bbox::BboxParseError> for RenderError {
    fn from(err: crate::bbox::BboxParseError) -> Self {
        RenderError::config(err.to_string())
    }
}

impl From<crate::crs::CrsParseError> for RenderError {
    fn from(err: crate::crs::CrsParseError) -> Self {
        RenderError::config(err.to_string())
    }
}

impl From<crate::time::TimeParseError> for RenderError {
    fn from(err: crate::time::TimeParseError) -> Self {
        RenderError::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_trace_keeps_kind_and_cause() {
        let err = RenderError::uniqueness("ID 'a' is defined more than once")
            .with_param("id", "a")
            .trace("Isoband layer failed");

        assert_eq!(err.kind(), ErrorKind::Uniqueness);
        assert_eq!(err.message(), "Isoband layer failed");
        assert_eq!(err.root().message(), "ID 'a' is defined more than once");
        assert_eq!(err.param("id"), Some("a"));
        assert!(err.source().is_some());
        assert_eq!(err.chain().count(), 2);
    }

    #[test]
    fn test_result_ext() {
        let result: RenderResult<()> = Err(RenderError::data("no data"));
        let err = result.with_param("qid", "l1").trace("outer").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.report().contains("qid = l1"));
    }

    #[test]
    fn test_json_error_is_config() {
        let err: RenderError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
