use std::path::PathBuf;
use thiserror::Error;

/// The central error type for the covenant crate.
///
/// This hierarchy separates caller mistakes (contract construction,
/// interaction arguments, server lifecycle) from failures signalled by the
/// underlying engine, which are surfaced unchanged.
#[derive(Error, Debug)]
pub enum CovenantError {
    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("Interaction error: {0}")]
    Interaction(#[from] InteractionError),

    #[error("Mock server error: {0}")]
    Server(#[from] ServerError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while constructing or configuring a contract.
#[derive(Error, Debug)]
pub enum ContractError {
    #[error("Consumer name cannot be empty")]
    EmptyConsumer,

    #[error("Provider name cannot be empty")]
    EmptyProvider,

    #[error("Unrecognized specification version: '{0}'")]
    InvalidSpecification(String),

    #[error("Unrecognized interaction kind: '{0}' (expected HTTP, Async, or Sync)")]
    InvalidInteractionKind(String),
}

/// Errors raised by interaction builder calls.
#[derive(Error, Debug)]
pub enum InteractionError {
    #[error(
        "Invalid combination of arguments: given() accepts a state alone, \
         a state with (name, value), or a state with parameters"
    )]
    InvalidGivenCombination,
}

/// Errors raised by the mock server lifecycle.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("The mock server is not running")]
    NotRunning,

    #[error("The mock server is already running")]
    AlreadyStarted,

    #[error("The mock server has been released and cannot be restarted")]
    AlreadyReleased,

    #[error("{} exists but is not a directory", path.display())]
    NotADirectory { path: PathBuf },
}

/// Failures signalled by the underlying engine. These are propagated to the
/// caller without retry or suppression.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown contract handle: {0}")]
    UnknownContract(u64),

    #[error("Unknown interaction handle: {0}")]
    UnknownInteraction(u64),

    #[error("Unknown mock server handle: {0}")]
    UnknownServer(u64),

    #[error("Unsupported transport: '{0}'")]
    UnsupportedTransport(String),

    #[error("Failed to bind mock server to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CovenantError>;
