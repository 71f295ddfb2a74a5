//! Error types for the status engine.
//!
//! Each error knows how to describe itself to a user via `user_message()`;
//! the `Display` output keeps the technical detail for logs.

use thiserror::Error;

use crate::model::IntentKind;

/// Weather fetch failures. All of them are recovered locally by the
/// weather manager, which keeps its last good snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeatherError {
    /// Transport-level failure: timeout, DNS, connection refused, non-2xx status.
    #[error("Network error: {0}")]
    Network(String),

    /// The response body did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Another request is already in flight and this one could not join it.
    #[error("A weather request is already in flight")]
    Busy,
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            WeatherError::Network(_) => "Weather unavailable. Check your connection.",
            WeatherError::Decode(_) => "Weather service sent an unexpected response.",
            WeatherError::Busy => "Weather is already updating.",
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WeatherError::Network(format!("request timed out: {err}"))
        } else if err.is_connect() {
            WeatherError::Network(format!("connection failed: {err}"))
        } else if err.is_decode() {
            WeatherError::Decode(err.to_string())
        } else {
            WeatherError::Network(err.to_string())
        }
    }
}

/// Location failures surfaced through the proximity state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProximityError {
    /// Location authorization was refused or revoked. Terminal for the session.
    #[error("Location permission denied")]
    PermissionDenied,

    /// A single position update failed; the stream keeps running.
    #[error("Position fix failed: {0}")]
    Fix(String),
}

impl ProximityError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ProximityError::PermissionDenied => "Location access is turned off.",
            ProximityError::Fix(_) => "Could not determine your location.",
        }
    }
}

/// Broken deployment configuration. Raised at startup; never degrades silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("No recipient phone number configured")]
    MissingRecipient,

    #[error("Invalid recipient phone number '{0}': expected digits with an optional leading '+'")]
    InvalidRecipient(String),

    #[error("Invalid URI template '{template}': {reason}")]
    InvalidUriTemplate { template: String, reason: String },

    #[error("Invalid {kind} message template: {reason}")]
    InvalidMessageTemplate { kind: IntentKind, reason: String },

    #[error("Invalid timestamp format '{0}'")]
    InvalidTimestampFormat(String),

    #[error("Invalid arrival threshold {0}: must be a positive number of kilometres")]
    InvalidThreshold(String),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Invalid weather settings: {0}")]
    InvalidWeather(String),
}

impl ConfigurationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigurationError::MissingRecipient | ConfigurationError::InvalidRecipient(_) => {
                "Messaging is not set up. Check the recipient number."
            }
            ConfigurationError::InvalidUriTemplate { .. }
            | ConfigurationError::InvalidMessageTemplate { .. }
            | ConfigurationError::InvalidTimestampFormat(_) => {
                "Messaging templates are invalid. Check your settings."
            }
            ConfigurationError::InvalidThreshold(_) | ConfigurationError::InvalidCoordinate(_) => {
                "Location settings are invalid. Check your settings."
            }
            ConfigurationError::InvalidWeather(_) => {
                "Weather settings are invalid. Check your settings."
            }
        }
    }
}

/// Failures turning an intent into a message URI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{kind} message needs field '{field}'")]
    MissingField { kind: IntentKind, field: String },

    #[error("Invalid timestamp '{0}': expected ISO-8601")]
    InvalidTimestamp(String),

    #[error("Field '{field}' is not valid UTF-8")]
    Encoding { field: String },
}

impl ComposeError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ComposeError::Configuration(e) => e.user_message(),
            ComposeError::MissingField { .. } => "Some required details are missing.",
            ComposeError::InvalidTimestamp(_) => "The selected time is not valid.",
            ComposeError::Encoding { .. } => "The message contains unsupported characters.",
        }
    }
}
