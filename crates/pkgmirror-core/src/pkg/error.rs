//! Package error types.

use std::fmt;
use std::io;

/// Package error codes.
pub mod codes {
    pub const PKG_SPEC_INVALID: &str = "PKG_SPEC_INVALID";
    pub const PKG_NOT_FOUND: &str = "PKG_NOT_FOUND";
    pub const PKG_VERSION_NOT_FOUND: &str = "PKG_VERSION_NOT_FOUND";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_DOWNLOAD_FAILED: &str = "PKG_DOWNLOAD_FAILED";
    pub const PKG_EXTRACT_FAILED: &str = "PKG_EXTRACT_FAILED";
    pub const PKG_STORE_ERROR: &str = "PKG_STORE_ERROR";

    // Backend-level failures
    pub const PKG_REGISTRY_UNREACHABLE: &str = "PKG_REGISTRY_UNREACHABLE";
    pub const PKG_REGISTRY_CONFIG: &str = "PKG_REGISTRY_CONFIG";
    pub const PKG_TIMEOUT: &str = "PKG_TIMEOUT";
    pub const PKG_CANCELLED: &str = "PKG_CANCELLED";

    // package.json reading
    pub const PKG_PACKAGE_JSON_NOT_FOUND: &str = "PKG_PACKAGE_JSON_NOT_FOUND";
    pub const PKG_PACKAGE_JSON_INVALID: &str = "PKG_PACKAGE_JSON_INVALID";
    pub const PKG_DEP_RANGE_INVALID: &str = "PKG_DEP_RANGE_INVALID";

    // requirements.txt reading
    pub const PKG_REQUIREMENTS_NOT_FOUND: &str = "PKG_REQUIREMENTS_NOT_FOUND";
    pub const PKG_REQUIREMENT_INVALID: &str = "PKG_REQUIREMENT_INVALID";
}

/// Package error.
///
/// `transient` marks failures worth retrying (timeouts, connection resets,
/// 5xx/429 responses). Everything else is permanent for the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgError {
    code: &'static str,
    message: String,
    transient: bool,
}

impl PkgError {
    /// Create a new permanent error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            transient: false,
        }
    }

    /// Mark this error as retryable (or not).
    #[must_use]
    pub fn with_transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether a retry of the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    /// Whether this error means the backend itself is unusable.
    ///
    /// Unreachability only becomes fatal once the retry budget is spent and no
    /// operation has ever reached the backend; that decision lives in the
    /// admission budget, not here.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.code == codes::PKG_REGISTRY_CONFIG
    }

    /// Whether this error is a connectivity failure to the backend.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        self.code == codes::PKG_REGISTRY_UNREACHABLE
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == codes::PKG_CANCELLED
    }

    /// Create a spec invalid error.
    pub fn spec_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_SPEC_INVALID, msg)
    }

    /// Create a package not found error.
    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(codes::PKG_NOT_FOUND, format!("Package not found: {name}"))
    }

    /// Create a version not found error.
    #[must_use]
    pub fn version_not_found(name: &str, range: &str) -> Self {
        Self::new(
            codes::PKG_VERSION_NOT_FOUND,
            format!("No version of {name} satisfies range: {range}"),
        )
    }

    /// Create a registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, msg)
    }

    /// Create a registry unreachable error (connection refused, DNS failure).
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REGISTRY_UNREACHABLE, msg).with_transient(true)
    }

    /// Create a registry configuration error. Always fatal.
    pub fn registry_config(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REGISTRY_CONFIG, msg)
    }

    /// Create a timeout error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_TIMEOUT, msg).with_transient(true)
    }

    /// Create a cancellation error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(codes::PKG_CANCELLED, "Operation cancelled")
    }

    /// Create a download failed error.
    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_DOWNLOAD_FAILED, msg)
    }

    /// Create an extraction failed error.
    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_EXTRACT_FAILED, msg)
    }

    /// Create an artifact store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_STORE_ERROR, msg)
    }

    /// Create a package.json not found error.
    #[must_use]
    pub fn package_json_not_found(path: &std::path::Path) -> Self {
        Self::new(
            codes::PKG_PACKAGE_JSON_NOT_FOUND,
            format!("package.json not found: {}", path.display()),
        )
    }

    /// Create a package.json invalid error.
    pub fn package_json_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_PACKAGE_JSON_INVALID, msg)
    }

    #[must_use]
    pub fn requirements_not_found(path: &std::path::Path) -> Self {
        Self::new(
            codes::PKG_REQUIREMENTS_NOT_FOUND,
            format!("requirements file not found: {}", path.display()),
        )
    }

    pub fn requirement_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REQUIREMENT_INVALID, msg)
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::PKG_STORE_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for PkgError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::unreachable(format!("Connection failed: {e}"))
        } else if e.is_builder() {
            Self::registry_config(format!("Invalid request: {e}"))
        } else if e.is_decode() {
            Self::registry(format!("Unparseable response: {e}"))
        } else {
            // Resets mid-body and similar request-level failures
            Self::registry(e.to_string()).with_transient(e.is_request() || e.is_body())
        }
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, format!("Invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        let err = PkgError::spec_invalid("bad spec");
        assert_eq!(err.code(), codes::PKG_SPEC_INVALID);
        assert!(err.to_string().contains(codes::PKG_SPEC_INVALID));
    }

    #[test]
    fn test_classification() {
        assert!(PkgError::timeout("slow").is_transient());
        assert!(PkgError::unreachable("dns").is_transient());
        assert!(PkgError::unreachable("dns").is_unreachable());
        assert!(!PkgError::not_found("left-pad").is_transient());
        assert!(PkgError::registry_config("bad url").is_fatal());
        assert!(!PkgError::unreachable("dns").is_fatal());
        assert!(PkgError::cancelled().is_cancelled());
        assert!(PkgError::registry("503").with_transient(true).is_transient());
    }

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::PKG_SPEC_INVALID,
            codes::PKG_NOT_FOUND,
            codes::PKG_VERSION_NOT_FOUND,
            codes::PKG_REGISTRY_ERROR,
            codes::PKG_DOWNLOAD_FAILED,
            codes::PKG_EXTRACT_FAILED,
            codes::PKG_STORE_ERROR,
            codes::PKG_REGISTRY_UNREACHABLE,
            codes::PKG_REGISTRY_CONFIG,
            codes::PKG_TIMEOUT,
            codes::PKG_CANCELLED,
            codes::PKG_PACKAGE_JSON_NOT_FOUND,
            codes::PKG_PACKAGE_JSON_INVALID,
            codes::PKG_DEP_RANGE_INVALID,
            codes::PKG_REQUIREMENTS_NOT_FOUND,
            codes::PKG_REQUIREMENT_INVALID,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }
}
