use thiserror::Error;

use crate::pipeline::SlotIndex;

/// Building the decode session failed. Not retried within the same attempt.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("required decoder component missing: {0}")]
    MissingComponent(String),
    #[error("invalid source locator {locator:?}: {reason}")]
    InvalidLocator { locator: String, reason: String },
    #[error("cannot open source {locator:?}: {reason}")]
    OpenFailed { locator: String, reason: String },
    #[error("pipeline already configured")]
    AlreadyConfigured,
}

/// The engine refused the transition to playing.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("pipeline is {0}, expected Configured")]
    InvalidState(&'static str),
    #[error("engine rejected play: {0}")]
    Rejected(String),
}

/// The first frame's structure description could not be mapped to a colour format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatDiscoveryError {
    #[error("unsupported caps name {0}")]
    UnsupportedName(String),
    #[error("unhandled {depth} bit RGB layout")]
    UnhandledRgb { depth: u32 },
    #[error("unhandled YUV fourcc {0}")]
    UnhandledFourcc(String),
    #[error("unhandled format string {0}")]
    UnhandledFormat(String),
    #[error("caps {0} carry no format field")]
    MissingField(String),
    #[error("invalid frame size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
}

/// Asynchronous failure reported by a running engine.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct EngineRuntimeError {
    pub message: String,
    pub details: Option<String>,
}

impl EngineRuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no such slot {0}")]
    UnknownSlot(SlotIndex),
    #[error("supervisor is shutting down")]
    ShuttingDown,
}
