//! # Release Error Classification
//!
//! Maps helm's stderr output to [`ReleaseError`] variants.
//!
//! Helm reports every failure with exit code 1 and the message is the only
//! signal available. Patterns are checked from most to least specific.

use super::ReleaseError;
use regex::Regex;
use std::sync::LazyLock;

static RELEASE_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)release:?\s+not found|release .* not found|has no deployed releases")
        .expect("valid release-not-found pattern")
});

static ALREADY_EXISTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)already exists|cannot re-use a name that is still in use|exists and cannot be imported",
    )
    .expect("valid already-exists pattern")
});

static SCHEMA_VIOLATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)values don't meet the specifications of the schema|values\.schema\.json")
        .expect("valid schema pattern")
});

static VALIDATION_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error validating|validationerror|admission webhook .* denied")
        .expect("valid validation pattern")
});

static INVALID_MANIFEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)unable to build kubernetes objects|error converting yaml to json|parse error|template: .*:\d+",
    )
    .expect("valid manifest pattern")
});

static TIMEOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)timed out|context deadline exceeded").expect("valid timeout pattern"));

/// Classify a helm error message
pub fn classify_helm_error(message: &str) -> ReleaseError {
    let message = message.trim().to_string();

    if SCHEMA_VIOLATION.is_match(&message) {
        return ReleaseError::ValuesSchemaViolation(message);
    }
    if ALREADY_EXISTS.is_match(&message) {
        return ReleaseError::AlreadyExists(message);
    }
    // Validation errors arrive wrapped in "unable to build kubernetes objects"
    if VALIDATION_FAILED.is_match(&message) {
        return ReleaseError::ValidationFailed(message);
    }
    if INVALID_MANIFEST.is_match(&message) {
        return ReleaseError::InvalidManifest(message);
    }
    if RELEASE_NOT_FOUND.is_match(&message) {
        return ReleaseError::ReleaseNotFound(message);
    }
    if TIMEOUT.is_match(&message) {
        return ReleaseError::Timeout(message);
    }

    ReleaseError::Other(message)
}
