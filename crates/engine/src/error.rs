//! The module contains the errors the engine can throw.
//!
//! The errors are:
//!
//! - [`NotFound`] thrown when the target user or channel does not exist.
//! - [`Validation`] thrown when the input is missing a required field.
//! - [`ExistingKey`] thrown when a channel name is already taken.
//! - [`Transport`] thrown when the backend provider fails or is unreachable.
//! - [`PartialFailure`] thrown when a saga committed some steps and failed
//!   a later one that cannot be compensated.
//! - [`Config`] thrown when the engine or transport is built with bad settings.
//!
//!  [`NotFound`]: EngineError::NotFound
//!  [`Validation`]: EngineError::Validation
//!  [`ExistingKey`]: EngineError::ExistingKey
//!  [`Transport`]: EngineError::Transport
//!  [`PartialFailure`]: EngineError::PartialFailure
//!  [`Config`]: EngineError::Config
use thiserror::Error;

use crate::saga::Step;

/// Engine custom errors.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("\"{0}\" not found!")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Provider error: {0}")]
    Transport(String),
    #[error("{saga} failed at {failed} after committing {}: {detail}", Step::join(.completed))]
    PartialFailure {
        saga: &'static str,
        completed: Vec<Step>,
        failed: Step,
        detail: String,
    },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::Transport(a), Self::Transport(b)) => a == b,
            (
                Self::PartialFailure {
                    saga: a_saga,
                    completed: a_completed,
                    failed: a_failed,
                    ..
                },
                Self::PartialFailure {
                    saga: b_saga,
                    completed: b_completed,
                    failed: b_failed,
                    ..
                },
            ) => a_saga == b_saga && a_completed == b_completed && a_failed == b_failed,
            (Self::Config(a), Self::Config(b)) => a == b,
            _ => false,
        }
    }
}
