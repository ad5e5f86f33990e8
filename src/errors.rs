// src/errors.rs
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fallback shown to the rider when nothing more specific is known.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Main error type for the rider client
#[derive(Debug)]
pub enum RiderError {
    // HTTP and API errors
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    TooManyRequests(String),
    InternalServer(String),
    UnexpectedStatus { status: u16, message: String },

    // Network and HTTP client errors
    NetworkTimeout,
    NetworkConnection(String),
    HttpClient(String),
    InvalidUrl(String),

    // Serialization and parsing errors
    JsonParsing(String),
    JsonSerialization(String),
    InvalidFormat(String),

    // Ride errors
    RideNotFound(String),
    InvalidRideId(String),
    InvalidRideStatus(String),

    // Realtime communication errors
    WebSocketConnection(String),
    WebSocketMessage(String),
    ChannelClosed,

    // Validation errors
    ValidationFailed(Vec<ValidationError>),
    MissingRequiredField(String),
    InvalidFieldValue { field: String, value: String, reason: String },

    // Configuration and setup errors
    ConfigurationError(String),
    InvalidConfiguration(String),

    // Session and storage errors
    NotAuthenticated,
    TokenExpired,
    TokenInvalid,
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for RiderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiderError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            RiderError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            RiderError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            RiderError::NotFound(msg) => write!(f, "Not found: {}", msg),
            RiderError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            RiderError::TooManyRequests(msg) => write!(f, "Too many requests: {}", msg),
            RiderError::InternalServer(msg) => write!(f, "Internal server error: {}", msg),
            RiderError::UnexpectedStatus { status, message } => {
                write!(f, "Unexpected HTTP status {}: {}", status, message)
            }

            RiderError::NetworkTimeout => write!(f, "Network request timed out"),
            RiderError::NetworkConnection(msg) => write!(f, "Network connection error: {}", msg),
            RiderError::HttpClient(msg) => write!(f, "HTTP client error: {}", msg),
            RiderError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),

            RiderError::JsonParsing(msg) => write!(f, "JSON parsing error: {}", msg),
            RiderError::JsonSerialization(msg) => write!(f, "JSON serialization error: {}", msg),
            RiderError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),

            RiderError::RideNotFound(id) => write!(f, "Ride not found: {}", id),
            RiderError::InvalidRideId(id) => write!(f, "Invalid ride ID: '{}'", id),
            RiderError::InvalidRideStatus(status) => write!(f, "Invalid ride status: {}", status),

            RiderError::WebSocketConnection(msg) => write!(f, "WebSocket connection error: {}", msg),
            RiderError::WebSocketMessage(msg) => write!(f, "WebSocket message error: {}", msg),
            RiderError::ChannelClosed => write!(f, "Live channel closed"),

            RiderError::ValidationFailed(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            RiderError::MissingRequiredField(field) => write!(f, "Missing required field: {}", field),
            RiderError::InvalidFieldValue { field, value, reason } => {
                write!(f, "Invalid value '{}' for field '{}': {}", value, field, reason)
            }

            RiderError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            RiderError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),

            RiderError::NotAuthenticated => write!(f, "No access token stored"),
            RiderError::TokenExpired => write!(f, "Authentication token has expired"),
            RiderError::TokenInvalid => write!(f, "Authentication token is invalid"),
            RiderError::Storage(msg) => write!(f, "Token storage error: {}", msg),
        }
    }
}

impl std::error::Error for RiderError {}

// Convenience type alias for Results
pub type RiderResult<T> = Result<T, RiderError>;

impl RiderError {
    /// Maps a non-success HTTP status and the message extracted from its body.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 => RiderError::BadRequest(message),
            401 => RiderError::Unauthorized(message),
            403 => RiderError::Forbidden(message),
            404 => RiderError::NotFound(message),
            409 => RiderError::Conflict(message),
            429 => RiderError::TooManyRequests(message),
            500..=599 => RiderError::InternalServer(message),
            _ => RiderError::UnexpectedStatus { status, message },
        }
    }

    /// The string the rider sees. Server messages pass through untouched,
    /// transport and internal failures collapse to fixed wording.
    pub fn user_message(&self) -> String {
        match self {
            RiderError::BadRequest(msg)
            | RiderError::Unauthorized(msg)
            | RiderError::Forbidden(msg)
            | RiderError::NotFound(msg)
            | RiderError::Conflict(msg)
            | RiderError::TooManyRequests(msg) => msg.clone(),

            RiderError::RideNotFound(_) | RiderError::InvalidRideId(_) => "Ride not found".to_string(),

            RiderError::NetworkTimeout => "The request timed out. Please try again.".to_string(),
            RiderError::NetworkConnection(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }

            RiderError::ValidationFailed(errors) => errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string()),
            RiderError::MissingRequiredField(field) => format!("{} is required", field),
            RiderError::InvalidFieldValue { field, reason, .. } => format!("{}: {}", field, reason),

            RiderError::NotAuthenticated => "Please log in to continue.".to_string(),
            RiderError::TokenExpired | RiderError::TokenInvalid => {
                "Your session has expired. Please log in again.".to_string()
            }

            _ => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RiderError::NotFound(_) | RiderError::RideNotFound(_))
    }
}

// Conversion implementations for common error types
impl From<reqwest::Error> for RiderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RiderError::NetworkTimeout
        } else if err.is_connect() {
            RiderError::NetworkConnection(err.to_string())
        } else if err.is_decode() {
            RiderError::JsonParsing(err.to_string())
        } else {
            RiderError::HttpClient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RiderError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            RiderError::JsonParsing(err.to_string())
        } else {
            RiderError::JsonSerialization(err.to_string())
        }
    }
}

impl From<url::ParseError> for RiderError {
    fn from(err: url::ParseError) -> Self {
        RiderError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RiderError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => RiderError::ChannelClosed,
            WsError::Io(io) => RiderError::WebSocketConnection(io.to_string()),
            WsError::Http(response) => {
                RiderError::WebSocketConnection(format!("handshake rejected with {}", response.status()))
            }
            other => RiderError::WebSocketMessage(other.to_string()),
        }
    }
}

impl From<std::io::Error> for RiderError {
    fn from(err: std::io::Error) -> Self {
        RiderError::Storage(err.to_string())
    }
}

// Helper functions for creating common errors
impl RiderError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        RiderError::BadRequest(msg.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        RiderError::NotFound(resource.into())
    }

    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        RiderError::ValidationFailed(vec![ValidationError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn ride_not_found(ride_id: impl Into<String>) -> Self {
        RiderError::RideNotFound(ride_id.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RiderError::RideNotFound("ride-42".to_string());
        assert_eq!(error.to_string(), "Ride not found: ride-42");
    }

    #[test]
    fn test_validation_error() {
        let error = RiderError::validation_error("phone_number", "Phone number is required");
        match &error {
            RiderError::ValidationFailed(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "phone_number");
            }
            _ => panic!("Expected ValidationFailed error"),
        }
        assert_eq!(error.user_message(), "Phone number is required");
    }

    #[test]
    fn test_http_status_mapping() {
        assert!(matches!(RiderError::from_http_status(400, "x"), RiderError::BadRequest(_)));
        assert!(matches!(RiderError::from_http_status(401, "x"), RiderError::Unauthorized(_)));
        assert!(matches!(RiderError::from_http_status(404, "x"), RiderError::NotFound(_)));
        assert!(matches!(RiderError::from_http_status(503, "x"), RiderError::InternalServer(_)));
        assert!(matches!(
            RiderError::from_http_status(418, "x"),
            RiderError::UnexpectedStatus { status: 418, .. }
        ));
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(RiderError::ride_not_found("ride-42").user_message(), "Ride not found");
        assert_eq!(
            RiderError::bad_request("Only requested rides can be cancelled").user_message(),
            "Only requested rides can be cancelled"
        );
        assert_eq!(RiderError::JsonParsing("eof".into()).user_message(), GENERIC_ERROR_MESSAGE);
        assert!(RiderError::NetworkTimeout.user_message().contains("timed out"));
    }
}
