use hyper::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the spindle load balancer
#[derive(Error, Debug, Clone)]
pub enum SpindleError {
    /// Configuration errors, fatal at startup
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The scheduler found no dispatchable backend
    #[error("no available backend")]
    NoAvailableBackend,

    /// An upstream deadline was exceeded
    #[error("upstream timed out after {duration:?}: {operation}")]
    BackendTimeout {
        operation: String,
        duration: Duration,
    },

    /// Upstream dial, reset or protocol failure
    #[error("upstream transport error: {message}")]
    BackendTransport { message: String },

    /// Health probe failure, never user-visible
    #[error("health probe failed: {message}")]
    Probe { message: String },

    /// Anything else that should not happen
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl SpindleError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::BackendTimeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::BackendTransport {
            message: message.into(),
        }
    }

    pub fn probe<S: Into<String>>(message: S) -> Self {
        Self::Probe {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status the dispatcher answers with when this error surfaces
    /// on the request path.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SpindleError::NoAvailableBackend => StatusCode::SERVICE_UNAVAILABLE,
            SpindleError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            SpindleError::BackendTransport { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Label value for the `spindle_request_errors_total` counter.
    pub fn error_type(&self) -> &'static str {
        match self {
            SpindleError::Config { .. } => "config",
            SpindleError::NoAvailableBackend => "no_backend",
            SpindleError::BackendTimeout { .. } => "backend_timeout",
            SpindleError::BackendTransport { .. } => "backend_transport",
            SpindleError::Probe { .. } => "probe_failure",
            SpindleError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for spindle operations
pub type SpindleResult<T> = Result<T, SpindleError>;

impl From<hyper::Error> for SpindleError {
    fn from(err: hyper::Error) -> Self {
        if err.is_timeout() {
            SpindleError::timeout("upstream request", Duration::from_secs(5))
        } else if err.is_connect() {
            SpindleError::transport(format!("connect error: {}", err))
        } else {
            SpindleError::transport(format!("http error: {}", err))
        }
    }
}

impl From<hyper::http::Error> for SpindleError {
    fn from(err: hyper::http::Error) -> Self {
        SpindleError::internal(format!("failed to build request: {}", err))
    }
}

impl From<hyper::http::uri::InvalidUri> for SpindleError {
    fn from(err: hyper::http::uri::InvalidUri) -> Self {
        SpindleError::config(format!("invalid URI: {}", err))
    }
}

impl From<serde_yaml::Error> for SpindleError {
    fn from(err: serde_yaml::Error) -> Self {
        SpindleError::config(format!("YAML parsing error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let config_err = SpindleError::config("listen_addr must not be empty");
        assert!(matches!(config_err, SpindleError::Config { .. }));
        assert_eq!(
            config_err.to_string(),
            "configuration error: listen_addr must not be empty"
        );

        let timeout_err = SpindleError::timeout("health probe", Duration::from_secs(5));
        assert!(matches!(timeout_err, SpindleError::BackendTimeout { .. }));
        assert_eq!(
            timeout_err.to_string(),
            "upstream timed out after 5s: health probe"
        );
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            SpindleError::NoAvailableBackend.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            SpindleError::timeout("read", Duration::from_secs(5)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            SpindleError::transport("connection reset").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            SpindleError::config("bad").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_type_labels() {
        assert_eq!(SpindleError::NoAvailableBackend.error_type(), "no_backend");
        assert_eq!(
            SpindleError::timeout("read", Duration::from_secs(1)).error_type(),
            "backend_timeout"
        );
        assert_eq!(
            SpindleError::transport("reset").error_type(),
            "backend_transport"
        );
        assert_eq!(SpindleError::probe("refused").error_type(), "probe_failure");
    }
}
