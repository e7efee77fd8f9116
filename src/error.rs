use thiserror::Error;

#[derive(Error, Debug)]
pub enum DrainError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node already registered: {0}")]
    DuplicateNode(String),

    #[error("Invalid drain spec {0:?}, expected node=user")]
    InvalidDrainSpec(String),

    #[error("Invalid run spec {0:?}, expected node:secs or ephemeral:secs")]
    InvalidRunSpec(String),

    #[error("Completion listener already started")]
    AlreadyStarted,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DrainError>;
