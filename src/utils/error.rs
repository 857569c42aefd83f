use thiserror::Error;

/// Failures talking to the organisation platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Organisation unit not found: {0}")]
    NotFound(String),

    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Only transient availability problems are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::Unauthorized(_) | GatewayError::Protocol(_)
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return GatewayError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            GatewayError::Protocol(err.to_string())
        } else {
            GatewayError::Unavailable(err.to_string())
        }
    }
}

impl GatewayError {
    /// HTTP status of a failed request. A 404 here means a wrong endpoint,
    /// never a missing object, so it is a fatal `Protocol` error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => GatewayError::Unauthorized(message),
            408 | 429 | 500..=599 => GatewayError::Unavailable(message),
            _ => GatewayError::Protocol(format!("HTTP {}: {}", status, message)),
        }
    }
}

#[derive(Error, Debug)]
pub enum GatekeeperError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Broker error: {message}")]
    BrokerError { message: String },

    #[error("Malformed event: {message}")]
    MalformedEvent { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl GatekeeperError {
    pub fn broker(message: impl Into<String>) -> Self {
        GatekeeperError::BrokerError {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        GatekeeperError::MalformedEvent {
            message: message.into(),
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            GatekeeperError::MalformedEvent { .. } => ErrorSeverity::Low,
            GatekeeperError::Gateway(GatewayError::NotFound(_)) => ErrorSeverity::Low,
            GatekeeperError::Gateway(GatewayError::Unavailable(_))
            | GatekeeperError::BrokerError { .. } => ErrorSeverity::Medium,
            GatekeeperError::Gateway(_)
            | GatekeeperError::IoError(_)
            | GatekeeperError::SerializationError(_) => ErrorSeverity::High,
            GatekeeperError::ConfigValidationError { .. }
            | GatekeeperError::InvalidConfigValueError { .. }
            | GatekeeperError::MissingConfigError { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            GatekeeperError::Gateway(GatewayError::Unauthorized(_)) => {
                "Check mo.client_id, mo.client_secret and the auth realm"
            }
            GatekeeperError::Gateway(GatewayError::Unavailable(_)) => {
                "Check that OS2mo is reachable; the event will be redelivered"
            }
            GatekeeperError::Gateway(GatewayError::Protocol(_)) => {
                "Check that the OS2mo GraphQL schema matches this release"
            }
            GatekeeperError::Gateway(GatewayError::NotFound(_)) => {
                "The object was removed upstream; nothing to do"
            }
            GatekeeperError::BrokerError { .. } => "Check amqp.url and that the broker is running",
            GatekeeperError::MalformedEvent { .. } => "Inspect the publisher of the event",
            GatekeeperError::IoError(_) => "Check file paths and permissions",
            GatekeeperError::SerializationError(_) => "Inspect the payload that failed to parse",
            GatekeeperError::ConfigValidationError { .. }
            | GatekeeperError::InvalidConfigValueError { .. }
            | GatekeeperError::MissingConfigError { .. } => {
                "Fix the configuration file and restart"
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, GatekeeperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert!(matches!(
            GatewayError::from_status(401, "x"),
            GatewayError::Unauthorized(_)
        ));
        assert!(matches!(
            GatewayError::from_status(403, "x"),
            GatewayError::Unauthorized(_)
        ));
        assert!(GatewayError::from_status(503, "x").is_retryable());
        assert!(GatewayError::from_status(429, "x").is_retryable());
        assert!(GatewayError::from_status(400, "x").is_fatal());
    }

    #[test]
    fn http_not_found_is_a_fatal_protocol_error() {
        let err = GatewayError::from_status(404, "Not Found");
        assert!(matches!(err, GatewayError::Protocol(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn severity_orders_config_errors_highest() {
        let err = GatekeeperError::MissingConfigError {
            field: "mo.client_secret".to_string(),
        };
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(
            GatekeeperError::malformed("no uuid").severity(),
            ErrorSeverity::Low
        );
    }
}
