//! Error types for the installation controller

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `QuotaError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// `spec.type` names a bundle the operator does not know
    #[error("{0}")]
    InstallationTypeError(String),

    #[error("failed to build a reconciler for {product}: {message}")]
    ReconcilerBuildError { product: String, message: String },

    #[error("wasn't able to find a quota in the quota config which matches the '{0}' quota parameter")]
    QuotaNotFoundError(String),

    #[error("Quota error: {0}")]
    QuotaError(String),

    #[error(
        "quota configuration can only be applied to Deployments, StatefulSets, Deployment Configs, ApiManager, Keycloak found {0}"
    )]
    UnsupportedKindError(String),

    #[error("Preflight check failed: {0}")]
    PreflightError(String),

    #[error("Informer error: {0}")]
    InformerError(String),

    #[error("{0}")]
    MultiError(MultiError),

    #[error("{message}: {source}")]
    WrappedError {
        message: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Transient error (will retry): {0}")]
    TransientError(String),

    #[error("Permanent error (will not retry): {0}")]
    PermanentError(String),
}

impl Error {
    /// Prefix the error with context, keeping the original as the source
    pub fn wrap(self, message: impl Into<String>) -> Self {
        Error::WrappedError {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// Check if this error is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 404,
            Error::NotFound(_) => true,
            Error::WrappedError { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429 || code == 404;
                    }
                    true
                }
                _ => true,
            },
            Error::TransientError(_) => true,
            Error::PermanentError(_) => false,
            Error::InvalidConfig(_) => false,
            Error::InstallationTypeError(_) => false,
            Error::ReconcilerBuildError { .. } => false,
            Error::UnsupportedKindError(_) => false,
            Error::SerializationError(_) => false,
            Error::MissingObjectKey(_) => false,
            // The quota config map or addon parameter may appear later
            Error::QuotaNotFoundError(_) => true,
            Error::QuotaError(_) => true,
            Error::NotFound(_) => true,
            Error::PreflightError(_) => true,
            Error::InformerError(_) => true,
            Error::MultiError(m) => m.errors.iter().any(Error::is_retryable),
            Error::WrappedError { source, .. } => source.is_retryable(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Accumulates errors without short-circuiting.
///
/// Renders as the individual messages joined with "; ".
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<Error>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, err: Error) {
        match err {
            Error::MultiError(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// `Ok(())` when nothing was collected
    pub fn into_result(self) -> Result<()> {
        match self.into_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn into_error(self) -> Option<Error> {
        if self.errors.is_empty() {
            None
        } else {
            Some(Error::MultiError(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt.min(32) as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Retryable errors come back on the fixed retry interval, structural ones back off
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.initial_delay
        } else {
            self.delay_for_attempt(attempt)
        }
    }
}
