//! Error types for runner-forge.

use thiserror::Error;

/// Crate-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Registration token could not be minted.
    #[error("Error creating registration token: {0}")]
    TokenRetrieval(String),

    /// Runner listing failed (transport or decode).
    #[error("Error getting runners: {0}")]
    RunnerList(String),

    /// No registered runner carries the requested label.
    ///
    /// Expected during teardown: ephemeral runners deregister themselves
    /// after finishing a job.
    #[error("Runner {0} not found")]
    MissingRunnerLabel(String),

    /// A runner was found but the platform rejected its deregistration.
    #[error("Error removing runner {label}: {reason}")]
    RunnerRemoval { label: String, reason: String },

    /// Platform/architecture pair outside the supported runner matrix.
    #[error("Unsupported runner target: platform '{platform}', architecture '{architecture}'")]
    UnsupportedTarget {
        platform: String,
        architecture: String,
    },

    /// Release metadata could not be fetched.
    #[error("Error getting latest release: {0}")]
    ReleaseLookup(String),

    /// No release asset matches the requested platform/architecture.
    #[error("Runner release not found for platform {platform} and architecture {architecture}")]
    ReleaseNotFound {
        platform: String,
        architecture: String,
    },

    /// Invalid or incomplete configuration, caught before any remote call.
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// Provider key not present in the provider registry.
    #[error("Unknown cloud provider: '{0}'")]
    UnknownProvider(String),

    /// Bootstrap template rendering failed.
    #[error("Template error: {0}")]
    Template(String),

    /// A bounded poll expired before the awaited condition held.
    #[error("Timed out waiting for {what} after {attempts} attempt(s)")]
    WaitTimeout { what: String, attempts: u32 },

    /// The persisted instance mapping is absent or unreadable.
    #[error("Malformed instance mapping: {0}")]
    Mapping(String),

    /// EC2 API error.
    #[error("EC2 API error: {0}")]
    Ec2(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for runner-forge.
pub type Result<T, E = Error> = std::result::Result<T, E>;
