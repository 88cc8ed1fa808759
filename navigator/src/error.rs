use std::io;

use thiserror::Error;

use crate::models::NavigationPhase;

/// Failure of an external provider call. The `Display` text is what the rider
/// sees as the routing failure reason, so it stays short.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("network offline")]
    Offline,
    #[error("request timed out")]
    Timeout,
    #[error("no directions available")]
    NoDirections,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("unexpected provider response: {0}")]
    Decoding(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_connect() {
            ProviderError::Offline
        } else if err.is_decode() {
            ProviderError::Decoding(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::Provider(format!("HTTP {}", status.as_u16()))
        } else {
            ProviderError::Provider(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read policy file: {0}")]
    Io(#[from] io::Error),
    #[error("invalid policy definition: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NavigatorError {
    #[error("current location unavailable")]
    LocationUnavailable,
    #[error("cannot {action} while navigation is {phase:?}")]
    InvalidTransition {
        action: &'static str,
        phase: NavigationPhase,
    },
    #[error("no destination selected")]
    NoDestination,
    #[error("navigation runtime has stopped")]
    RuntimeClosed,
    #[error("failed to build GPX document: {0}")]
    Gpx(#[from] gpx::errors::GpxError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
