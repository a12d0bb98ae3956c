//! Custom error types for eks-auto-updater.

use std::fmt;

use thiserror::Error;

/// Result alias for component update operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Errors that can occur while updating node groups and add-ons.
#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("[{0}] {1}")]
    AwsSdk(String, String),

    #[error("[{0}] AWS credentials error: {1}")]
    AwsCredentials(String, String),

    #[error("[{0}] AWS region not configured: {1}")]
    AwsRegion(String, String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Failed to describe {resource}: {source}")]
    DescribeFailed {
        resource: String,
        #[source]
        source: Box<UpdaterError>,
    },

    #[error("No default version of add-on {addon} for Kubernetes {k8s_version}")]
    NoDefaultVersion { addon: String, k8s_version: String },

    #[error("Invalid version format: {0}")]
    InvalidVersionFormat(String),

    #[error("Parameter lookup failed for {name}: {details}")]
    ParameterLookup { name: String, details: String },

    #[error("Update call for {resource} failed: {source}")]
    UpdateCallFailed {
        resource: String,
        #[source]
        source: Box<UpdaterError>,
    },

    #[error("Timeout waiting for {operation}: {details}")]
    UpdateTimeout { operation: String, details: String },

    #[error("Update of {resource} ended in status {status}")]
    UpdateFailed { resource: String, status: String },

    #[error("Verification of {resource} failed: expected version {expected}, found {actual}")]
    VerificationMismatch {
        resource: String,
        expected: String,
        actual: String,
    },

    #[error("Update worker for {0} stopped without reporting an outcome")]
    WorkerAborted(String),
}

impl UpdaterError {
    /// Create an AWS SDK error from any error type.
    /// Analyzes the error message to provide more specific error types.
    pub fn aws<E: fmt::Debug + fmt::Display>(component: &str, err: E) -> Self {
        let err_debug = format!("{err:?}");
        let err_display = err.to_string();
        let component = component.to_string();

        let combined_lower = format!("{err_display} {err_debug}").to_lowercase();

        if CREDENTIAL_MARKERS
            .iter()
            .any(|marker| combined_lower.contains(marker))
        {
            return Self::AwsCredentials(
                component,
                Self::extract_error_details(&err_debug, &err_display),
            );
        }

        if combined_lower.contains("no region")
            || combined_lower.contains("region not found")
            || combined_lower.contains("missing region")
        {
            return Self::AwsRegion(
                component,
                Self::extract_error_details(&err_debug, &err_display),
            );
        }

        Self::AwsSdk(
            component,
            Self::extract_error_details(&err_debug, &err_display),
        )
    }

    /// Wrap a remote read error for `resource`.
    pub fn describe(resource: impl Into<String>, source: Self) -> Self {
        Self::DescribeFailed {
            resource: resource.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a rejected update call for `resource`.
    pub fn update_call(resource: impl Into<String>, source: Self) -> Self {
        Self::UpdateCallFailed {
            resource: resource.into(),
            source: Box::new(source),
        }
    }

    /// Extract meaningful error details from AWS SDK error.
    /// Returns a single-line error message.
    fn extract_error_details(debug_str: &str, display_str: &str) -> String {
        // Pattern: message: Some("actual error message")
        if let Some(pos) = debug_str.find("message: Some(\"") {
            let start = pos + "message: Some(\"".len();
            let rest = &debug_str[start..];
            if let Some(end) = rest.find('"') {
                return rest[..end].to_string();
            }
        }

        if !display_str.to_lowercase().contains("service error") {
            return display_str.to_string();
        }

        "AWS API request failed".to_string()
    }
}

const CREDENTIAL_MARKERS: &[&str] = &[
    "no credentials",
    "credentials not found",
    "invalid credentials",
    "expired token",
    "expiredtoken",
    "the security token included in the request is invalid",
    "the security token included in the request is expired",
    "unrecognized client",
    "invalidclienttokenid",
    "signaturedoesnotmatch",
    "access denied",
    "not authorized",
    "accessdenied",
];

/// Kind of managed component an outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    NodeGroup,
    Addon,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeGroup => f.write_str("nodegroup"),
            Self::Addon => f.write_str("addon"),
        }
    }
}

/// A single component's failure inside a [`JoinedError`].
#[derive(Debug)]
pub struct ComponentFailure {
    pub kind: ComponentKind,
    pub name: String,
    pub error: UpdaterError,
}

impl fmt::Display for ComponentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.name, self.error)
    }
}

/// Every component failure of one run, none dropped.
#[derive(Debug, Default)]
pub struct JoinedError {
    failures: Vec<ComponentFailure>,
}

impl JoinedError {
    pub fn new(failures: Vec<ComponentFailure>) -> Self {
        Self { failures }
    }

    #[cfg(test)]
    pub fn failures(&self) -> &[ComponentFailure] {
        &self.failures
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for JoinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} component update(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "\n  - {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for JoinedError {}
