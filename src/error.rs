use thiserror::Error;

use crate::machine::{StoreError, TableError, TransitionError};

#[derive(Debug, Error)]
pub enum FloodgateError {
    #[error("transition failed: {0}")]
    Transition(#[from] TransitionError),

    #[error("transition table error: {0}")]
    Table(#[from] TableError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
