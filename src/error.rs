/// Error taxonomy shared by the supervisor, the meter client and the pipeline
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The meter process could not be started
    #[error("Failed to launch meter: {0}")]
    Launch(String),

    /// Connection refused, timed out or otherwise never answered
    #[error("Meter API unreachable: {0}")]
    ApiUnreachable(String),

    /// The meter answered with a non-success status
    #[error("Meter API rejected request ({status}): {body}")]
    ApiRejected { status: u16, body: String },

    #[error("Meter API not ready after {0:?}")]
    ReadyTimeout(Duration),

    #[error("Meter process exited: {0}")]
    MeterExited(String),

    /// The meter answered but the payload could not be understood
    #[error("Unexpected meter response: {0}")]
    Protocol(String),

    /// A control action that makes no sense in the current meter state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        BridgeError::Config(msg.into())
    }

    pub fn launch<S: Into<String>>(msg: S) -> Self {
        BridgeError::Launch(msg.into())
    }

    /// Transient failures the poller retries every cycle
    pub fn is_unreachable(&self) -> bool {
        matches!(self, BridgeError::ApiUnreachable(_))
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return BridgeError::Protocol(e.to_string());
        }
        if let Some(status) = e.status() {
            return BridgeError::ApiRejected {
                status: status.as_u16(),
                body: e.to_string(),
            };
        }
        BridgeError::ApiUnreachable(e.to_string())
    }
}
