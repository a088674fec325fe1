//! Error handling for recipe rendering.
//! Defines the error taxonomy shared by the parser, the evaluator, the variant
//! matrix builder and the output graph resolver.

use std::fmt;
use std::io;
use thiserror::Error;

/// Custom error types for rendering operations.
///
/// Every variant carries enough structure for caller-side diagnostics:
/// the kind (see [`Error::kind`]), a message and, where known, the field path
/// or expression that caused it.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed syntax, unknown keys or schema type mismatches.
    #[error("Parse error at '{path}': {message}.")]
    ParseError { path: String, message: String },

    /// Undefined variables, malformed expressions, unknown built-ins or arguments.
    #[error("Evaluation error{}: {message}.", location_suffix(.location))]
    EvaluationError { message: String, location: Option<String> },

    /// Zip-key length mismatches and empty candidate lists.
    #[error("Variant error: {0}.")]
    VariantError(String),

    /// Unknown inherit or pin targets and cycles between outputs.
    #[error("Graph error: {0}.")]
    GraphError(String),

    /// Represents errors that occur while reading recipe or variant files
    #[error("IO error: {0}.")]
    IoError(#[from] io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Evaluation,
    Variant,
    Graph,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Evaluation => "evaluation",
            ErrorKind::Variant => "variant",
            ErrorKind::Graph => "graph",
            ErrorKind::Io => "io",
        };
        f.write_str(name)
    }
}

fn location_suffix(location: &Option<String>) -> String {
    match location {
        Some(location) => format!(" at '{location}'"),
        None => String::new(),
    }
}

impl Error {
    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ParseError { path: path.into(), message: message.into() }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Error::EvaluationError { message: message.into(), location: None }
    }

    /// Attaches a location to an evaluation error that does not have one yet.
    /// Other variants are returned unchanged.
    pub fn at(self, location: &str) -> Self {
        match self {
            Error::EvaluationError { message, location: None } => {
                Error::EvaluationError { message, location: Some(location.to_string()) }
            }
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ParseError { .. } => ErrorKind::Parse,
            Error::EvaluationError { .. } => ErrorKind::Evaluation,
            Error::VariantError(_) => ErrorKind::Variant,
            Error::GraphError(_) => ErrorKind::Graph,
            Error::IoError(_) => ErrorKind::Io,
        }
    }

    /// Field path or expression location, when the error carries one.
    pub fn location(&self) -> Option<&str> {
        match self {
            Error::ParseError { path, .. } => Some(path),
            Error::EvaluationError { location, .. } => location.as_deref(),
            _ => None,
        }
    }
}

impl From<minijinja::Error> for Error {
    fn from(err: minijinja::Error) -> Self {
        let message = match err.detail() {
            Some(detail) => format!("{}: {}", err.kind(), detail),
            None => err.kind().to_string(),
        };
        Error::evaluation(message)
    }
}

/// Convenience type alias for Results with [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Default error handler that prints the error and exits the program.
///
/// # Arguments
/// * `err` - The error to handle
///
/// # Behavior
/// Prints the error message to stderr and exits with status code 1
pub fn default_error_handler(err: anyhow::Error) {
    eprintln!("{err:#}");
    std::process::exit(1);
}
