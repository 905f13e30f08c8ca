// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use cmv_core::ErrorKind;
use cmv_orchestrator::OrchestratorError;
use cmv_policy::PolicyError;
use cmv_storage::{MetadataError, PayloadError};
use thiserror::Error;

/// Errors surfaced by [`crate::VolumeEngine`], tagged with the caller-facing
/// taxonomy via [`EngineError::kind`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidArgument(#[from] PolicyError),
    #[error("orchestrator unavailable: {0}")]
    Unavailable(#[from] OrchestratorError),
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
    #[error("{0}")]
    FatalBug(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::Unavailable(_) => ErrorKind::Unavailable,
            EngineError::Payload(e) => match e {
                PayloadError::NotFound(_) => ErrorKind::NotFound,
                PayloadError::Aborted(_) => ErrorKind::Aborted,
                PayloadError::InvariantViolation(_) => ErrorKind::FatalBug,
            },
            EngineError::Metadata(_) => ErrorKind::Internal,
            EngineError::FatalBug(_) => ErrorKind::FatalBug,
        }
    }
}
