//! Sensitive data marker for automatic redaction
//!
//! Database connection strings embed credentials. Wrapping them in
//! `Sensitive<T>` keeps them out of logs and error messages.

use std::fmt;

/// Wrapper for sensitive data that redacts itself in Debug and Display
///
/// # Example
///
/// ```
/// use automig_core_types::Sensitive;
///
/// let url = Sensitive::new("postgres://app:hunter2@db/app");
/// assert_eq!(format!("{:?}", url), "***REDACTED***");
/// assert_eq!(format!("{}", url), "***REDACTED***");
///
/// // Access the actual value when connecting
/// assert_eq!(url.expose(), &"postgres://app:hunter2@db/app");
/// ```
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    /// Wrap a sensitive value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the underlying sensitive value
    ///
    /// Only the connection layer should need this.
    pub fn expose(&self) -> &T {
        &self.0
    }

    /// Consume the wrapper and return the inner value
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***REDACTED***")
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***REDACTED***")
    }
}

impl<T: Clone> Clone for Sensitive<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl From<String> for Sensitive<String> {
    fn from(value: String) -> Self {
        Self(value)
    }
}
