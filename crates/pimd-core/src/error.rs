//! Layered error type for the broker.
//!
//! `PimError` is the crate-spanning error every `pimd-*` crate eventually
//! converts its local `thiserror` enum into. It carries a stable `code`
//! (`<domain>.<reason>`, used on the wire as the `NO`/`BAD` response text)
//! plus an [`ErrorCategory`] that downstream handlers use to decide whether
//! a transaction should retry, roll back, or just report.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Broad disposition of an error, independent of its exact code.
///
/// Connection handlers map this to the §6.4 wire taxonomy: `Protocol` and
/// `Integrity` become tagged `NO`, `Io`/`Internal` usually also `NO` but are
/// logged at `error!` rather than `warn!`, and `Cancelled` never reaches the
/// wire (it is a client-side job outcome only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Framing, unknown command, or truncated literal.
    Protocol,
    /// SQL driver or schema error.
    Storage,
    /// Referential/integrity violation (cycle, duplicate unique key, ...).
    Integrity,
    /// External payload I/O (file missing, size mismatch, path escape).
    Io,
    /// The caller (or an ancestor job) was cancelled.
    Cancelled,
    /// Anything else, not yet worth its own category.
    Internal,
}

/// The broker's crate-spanning error type.
#[derive(Debug, Clone)]
pub struct PimError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl PimError {
    pub fn new(code: &'static str, category: ErrorCategory, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            category,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Short text suitable for a tagged `NO <reason>` wire response.
    pub fn wire_reason(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for PimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl StdError for PimError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn StdError + 'static))
    }
}

/// Convenience conversion from a crate-local error enum into the
/// crate-spanning `PimError`.
pub trait IntoPimError {
    fn into_pim_error(self) -> PimError;
}

impl IntoPimError for PimError {
    fn into_pim_error(self) -> PimError {
        self
    }
}
