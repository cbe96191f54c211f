use thiserror::Error;

use crate::formula::{EvalError, ParseError};

#[derive(Error, Debug)]
pub enum NexusError {
    #[error("Profile not found: {0}")]
    ProfileNotFound(crate::core::types::EntityId),

    #[error("Formula parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Formula evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Lifecycle error in {component}: {message}")]
    Lifecycle {
        component: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, NexusError>;
