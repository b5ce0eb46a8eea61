//! Unified error types for imgforge.
//!
//! Every fatal failure in the build pipeline surfaces as an [`ImgforgeError`].
//! Stage-specific detail lives in the `*ErrorKind` sources so callers can match
//! on what went wrong while the top-level variant carries the context chain.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for imgforge operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ImgforgeError {
    /// A pipeline step failed for one architecture
    #[error("{step} failed for {arch}")]
    Step {
        step: String,
        arch: String,
        #[source]
        source: Box<ImgforgeError>,
    },

    /// Errors while mutating the working tree
    #[error("Filesystem mutation failed: {context}")]
    Mutation {
        context: String,
        #[source]
        source: MutationErrorKind,
    },

    /// Errors while serializing or persisting a layer
    #[error("Layer build failed: {context}")]
    Layer {
        context: String,
        #[source]
        source: LayerErrorKind,
    },

    /// Errors during SBOM generation
    #[error("SBOM generation failed: {context}")]
    Sbom {
        context: String,
        #[source]
        source: SbomErrorKind,
    },

    /// Errors while assembling index artifacts
    #[error("Index assembly failed: {context}")]
    Index {
        context: String,
        #[source]
        source: IndexErrorKind,
    },

    /// IO errors with context
    #[error("IO error at {path:?}: {message}")]
    Io {
        path: Option<PathBuf>,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The build observed a cancellation request
    #[error("Build cancelled before {0}")]
    Cancelled(String),
}

/// Specific mutation error kinds
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MutationErrorKind {
    #[error("package manager: {0}")]
    PackageManager(String),

    #[error("invalid directive: {0}")]
    InvalidDirective(String),

    #[error("supervision tree: {0}")]
    Supervision(String),

    #[error("{0}")]
    Io(#[source] std::io::Error),
}

/// Specific layer error kinds.
///
/// The writer-side variants map one-to-one onto the stages of the
/// compressed stream so a failure names exactly where it happened.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LayerErrorKind {
    #[error("opening output sink: {0}")]
    OpenSink(#[source] std::io::Error),

    #[error("closing gzip writer: {0}")]
    CompressorClose(#[source] std::io::Error),

    #[error("flushing output: {0}")]
    Flush(#[source] std::io::Error),

    #[error("stat after flush: {0}")]
    Stat(#[source] std::io::Error),

    #[error("walking tree: {0}")]
    Walk(String),

    #[error("writing archive entry: {0}")]
    Serialize(#[source] std::io::Error),

    #[error("moving layer into place: {0}")]
    Persist(#[source] std::io::Error),
}

/// Specific SBOM error kinds
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SbomErrorKind {
    #[error("reading layer back: {0}")]
    LayerReadBack(String),

    #[error("layer digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("unexpected layer count in manifest: {0}")]
    LayerCount(usize),

    #[error("malformed os-release: {0}")]
    MalformedRelease(String),

    #[error("package index unavailable: {0}")]
    PackageIndex(String),

    #[error("out-of-order transition: expected stage {expected}, currently {actual}")]
    StageOrder { expected: String, actual: String },

    #[error("serialization: {0}")]
    Serialization(String),

    #[error("format has no index form: {0}")]
    UnsupportedFormat(String),
}

/// Specific index error kinds
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum IndexErrorKind {
    #[error("unexpected layer count in manifest: {0}")]
    LayerCount(usize),

    #[error("checksumming SBOM: {0}")]
    Checksum(#[source] std::io::Error),

    #[error("encoding manifest: {0}")]
    Manifest(String),
}

// ============================================================================
// Result type alias
// ============================================================================

/// Convenient Result type for imgforge operations
pub type Result<T> = std::result::Result<T, ImgforgeError>;

// ============================================================================
// Error construction helpers
// ============================================================================

impl ImgforgeError {
    /// Wrap an error with the failing step and architecture
    pub fn step(step: impl ToString, arch: impl ToString, source: ImgforgeError) -> Self {
        Self::Step {
            step: step.to_string(),
            arch: arch.to_string(),
            source: Box::new(source),
        }
    }

    /// Create a mutation error with context
    pub fn mutation(context: impl Into<String>, source: MutationErrorKind) -> Self {
        Self::Mutation {
            context: context.into(),
            source,
        }
    }

    /// Create a layer error with context
    pub fn layer(context: impl Into<String>, source: LayerErrorKind) -> Self {
        Self::Layer {
            context: context.into(),
            source,
        }
    }

    /// Create an SBOM error with context
    pub fn sbom(context: impl Into<String>, source: SbomErrorKind) -> Self {
        Self::Sbom {
            context: context.into(),
            source,
        }
    }

    /// Create an index error with context
    pub fn index(context: impl Into<String>, source: IndexErrorKind) -> Self {
        Self::Index {
            context: context.into(),
            source,
        }
    }

    /// Create an IO error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        let message = format!("{source}");
        Self::Io {
            path: Some(path),
            message,
            source,
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True when this error, or the error it wraps, is a cancellation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled(_) => true,
            Self::Step { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

// ============================================================================
// Conversions from existing error types
// ============================================================================

impl From<std::io::Error> for ImgforgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: None,
            message: format!("{err}"),
            source: err,
        }
    }
}

impl From<serde_json::Error> for ImgforgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::sbom(
            "JSON serialization",
            SbomErrorKind::Serialization(err.to_string()),
        )
    }
}

// ============================================================================
// Error context extension trait
// ============================================================================

/// Extension trait for adding context to errors.
///
/// The context string is prepended to whatever context the error already
/// carries, so a failure deep in the layer writer reads like
/// `"building layer for x86_64: writing etc/passwd: ..."`.
///
/// ```ignore
/// use imgforge::error::ErrorContext;
///
/// let contents = std::fs::read(&path)
///     .with_context(|| format!("reading {}", path.display()))?;
/// ```
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context from a closure, evaluated only on error.
    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: Into<ImgforgeError>> ErrorContext<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        let ctx: String = context.into();
        self.map_err(|e| add_context_to_error(e.into(), &ctx))
    }

    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| {
            let ctx: String = f().into();
            add_context_to_error(e.into(), &ctx)
        })
    }
}

/// Add context to an error, chaining with any existing context.
fn add_context_to_error(err: ImgforgeError, new_ctx: &str) -> ImgforgeError {
    match err {
        ImgforgeError::Mutation {
            context: existing,
            source,
        } => ImgforgeError::Mutation {
            context: chain_context(new_ctx, &existing),
            source,
        },
        ImgforgeError::Layer {
            context: existing,
            source,
        } => ImgforgeError::Layer {
            context: chain_context(new_ctx, &existing),
            source,
        },
        ImgforgeError::Sbom {
            context: existing,
            source,
        } => ImgforgeError::Sbom {
            context: chain_context(new_ctx, &existing),
            source,
        },
        ImgforgeError::Index {
            context: existing,
            source,
        } => ImgforgeError::Index {
            context: chain_context(new_ctx, &existing),
            source,
        },
        ImgforgeError::Io {
            path,
            message,
            source,
        } => ImgforgeError::Io {
            path,
            message: chain_context(new_ctx, &message),
            source,
        },
        ImgforgeError::Config(msg) => ImgforgeError::Config(chain_context(new_ctx, &msg)),
        ImgforgeError::Validation(msg) => {
            ImgforgeError::Validation(chain_context(new_ctx, &msg))
        }
        // Step and Cancelled already name where they happened
        other @ (ImgforgeError::Step { .. } | ImgforgeError::Cancelled(_)) => other,
    }
}

/// Chain two context strings together.
///
/// If the existing context is empty, returns just the new context.
/// Otherwise, returns "`new_context`: `existing_context`".
fn chain_context(new: &str, existing: &str) -> String {
    if existing.is_empty() {
        new.to_string()
    } else {
        format!("{new}: {existing}")
    }
}

/// Extension trait for Option types to convert to errors with context.
pub trait OptionContext<T> {
    /// Convert None to an error with the given context.
    fn context_none(self, context: impl Into<String>) -> Result<T>;

    /// Convert None to an error with context from a closure.
    fn with_context_none<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> OptionContext<T> for Option<T> {
    fn context_none(self, context: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| ImgforgeError::Validation(context.into()))
    }

    fn with_context_none<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.ok_or_else(|| ImgforgeError::Validation(f().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_step_error_names_step_and_arch() {
        let inner = ImgforgeError::mutation(
            "writing etc/passwd",
            MutationErrorKind::InvalidDirective("bad uid".to_string()),
        );
        let err = ImgforgeError::step("accounts", "aarch64", inner);
        let display = err.to_string();
        assert!(display.contains("accounts"), "missing step: {display}");
        assert!(display.contains("aarch64"), "missing arch: {display}");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_chain() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ImgforgeError::io("/out/layer.tar.gz", io_err);

        assert!(err.to_string().contains("/out/layer.tar.gz"));
    }

    #[test]
    fn test_context_chaining_multiple_levels() {
        fn inner() -> Result<()> {
            Err(ImgforgeError::layer(
                "base",
                LayerErrorKind::Walk("denied".to_string()),
            ))
        }

        fn middle() -> Result<()> {
            inner().context("middle layer")
        }

        fn outer() -> Result<()> {
            middle().context("outer layer")
        }

        match outer() {
            Err(ImgforgeError::Layer { context, .. }) => {
                assert_eq!(context, "outer layer: middle layer: base");
            }
            other => panic!("Expected Layer error, got {other:?}"),
        }
    }

    #[test]
    fn test_step_is_not_rewrapped_by_context() {
        let err: Result<()> = Err(ImgforgeError::step(
            "paths",
            "x86_64",
            ImgforgeError::validation("boom"),
        ));
        match err.context("outer") {
            Err(ImgforgeError::Step { step, arch, .. }) => {
                assert_eq!(step, "paths");
                assert_eq!(arch, "x86_64");
            }
            other => panic!("Expected Step error, got {other:?}"),
        }
    }

    #[test]
    fn test_with_context_lazy_evaluation() {
        let mut called = false;

        let ok_result: Result<i32> = Ok(42);
        let _ = ok_result.with_context(|| {
            called = true;
            "should not be called"
        });
        assert!(!called, "Closure should not be called for Ok result");

        let err_result: Result<i32> = Err(ImgforgeError::validation("error"));
        let _ = err_result.with_context(|| {
            called = true;
            "should be called"
        });
        assert!(called, "Closure should be called for Err result");
    }

    #[test]
    fn test_option_context() {
        let none_value: Option<i32> = None;
        match none_value.context_none("missing value") {
            Err(ImgforgeError::Validation(msg)) => assert_eq!(msg, "missing value"),
            other => panic!("Expected Validation error, got {other:?}"),
        }
        assert_eq!(Some(7).context_none("unused").ok(), Some(7));
    }

    #[test]
    fn test_cancellation_detected_through_step() {
        let err = ImgforgeError::step(
            "layer",
            "riscv64",
            ImgforgeError::Cancelled("archive entry".to_string()),
        );
        assert!(err.is_cancelled());
        assert!(!ImgforgeError::validation("x").is_cancelled());
    }

    #[test]
    fn test_chain_context_helper() {
        assert_eq!(chain_context("new", ""), "new");
        assert_eq!(chain_context("new", "existing"), "new: existing");
    }
}
