//! Error types for confq
//!
//! Structured errors with context: the failure kind, the document path or
//! file involved, and an actionable help message where one exists.

use std::fmt;

/// Result type alias for confq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for confq operations
#[derive(Debug, Clone)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Path in the document where the error occurred (e.g., `.servers[0].host`)
    pub path: Option<String>,
    /// File involved, if any
    pub file: Option<String>,
    /// Actionable help message
    pub help: Option<String>,
    /// Underlying cause (as string for Clone compatibility)
    pub cause: Option<String>,
}

/// Categories of errors that can occur
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Error decoding an input document
    Parse,
    /// Filesystem error while reading or writing
    Io,
    /// A referenced file could not be found on the search path
    MissingFile { filename: String },
    /// A file recurred on an active inheritance chain
    Cycle { abs_path: String },
    /// A sentinel field does not have the required shape
    Shape,
    /// The embedded expression engine failed to parse, compile, or run
    Expression { expression: String },
    /// An evaluation result does not satisfy the expected type
    TypeMismatch { expected: String, actual: String },
    /// A built-in function was given a bad target or argument
    Reference,
    /// A fixpoint phase still had work when its TTL reached zero
    TtlExhausted { remaining: usize },
    /// The loader has no decoder for this file type
    Unsupported { extension: String },
    /// Internal error (bug in confq)
    Internal,
}

impl Error {
    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            file: None,
            help: None,
            cause: None,
        }
    }

    /// Create a parse error for an input document
    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse).with_cause(message)
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io).with_cause(message)
    }

    /// Create a missing-file error
    pub fn missing_file(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self::new(ErrorKind::MissingFile {
            filename: filename.clone(),
        })
        .with_help(format!(
            "Check that '{}' exists in the base directory, a $local directory, or JF_PATH; \
             append '?' to the reference to make it optional",
            filename
        ))
    }

    /// Create a cycle error for an inheritance chain
    pub fn cycle(abs_path: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cycle {
            abs_path: abs_path.into(),
        })
        .with_help("Break the inheritance loop by removing one of the $extends/$includes entries")
    }

    /// Create a shape violation error
    pub fn shape(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Shape).with_cause(message)
    }

    /// Create an expression failure error
    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Expression {
            expression: expression.into(),
        })
        .with_cause(message)
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        })
    }

    /// Create a reference error
    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reference).with_cause(message)
    }

    /// Create a TTL exhaustion error
    pub fn ttl_exhausted(remaining: usize, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::TtlExhausted { remaining })
            .with_cause(detail)
            .with_help("Values keep producing new sentinel strings; check for mutually recursive eval: entries")
    }

    /// Create an unsupported-file-type error
    pub fn unsupported(extension: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported {
            extension: extension.into(),
        })
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_cause(message)
    }

    /// Add document path context to the error
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Add the file involved to the error
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Add help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add an underlying cause to the error
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Parse => write!(f, "Parse error")?,
            ErrorKind::Io => write!(f, "I/O error")?,
            ErrorKind::MissingFile { filename } => write!(f, "File not found: {}", filename)?,
            ErrorKind::Cycle { abs_path } => {
                write!(f, "Circular inheritance detected: {}", abs_path)?
            }
            ErrorKind::Shape => write!(f, "Shape violation")?,
            ErrorKind::Expression { expression } => {
                write!(f, "Expression failed: {}", expression)?
            }
            ErrorKind::TypeMismatch { expected, actual } => {
                write!(f, "Type mismatch: expected {}, got {}", expected, actual)?
            }
            ErrorKind::Reference => write!(f, "Reference error")?,
            ErrorKind::TtlExhausted { remaining } => write!(
                f,
                "Rewrite limit exhausted with {} entries unresolved",
                remaining
            )?,
            ErrorKind::Unsupported { extension } => {
                write!(f, "Unsupported file type: {}", extension)?
            }
            ErrorKind::Internal => write!(f, "Internal error")?,
        }

        if let Some(path) = &self.path {
            write!(f, "\n  Path: {}", path)?;
        }
        if let Some(file) = &self.file {
            write!(f, "\n  File: {}", file)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "\n  {}", cause)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  Help: {}", help)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io(e.to_string())
    }
}
