// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! The contract between the runner and the code that does the actual work.

use async_trait::async_trait;

use super::control::ExecutionControl;
use crate::checkpoint::Checkpoint;

/// Errors an executor can return.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The attempt failed and may be retried.
    #[error("{0}")]
    Failed(String),
    /// The operation was cancelled while the executor was waiting.
    #[error("operation cancelled")]
    Cancelled,
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// One attempt handed to an [`OperationExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub operation_id: String,
    pub operation_name: String,
    pub operation_type: String,
    pub parameters: serde_json::Value,
    /// Checkpoint saved when the operation was last paused, if persistence
    /// was requested.
    pub resumed_from: Option<Checkpoint>,
    /// Zero-based attempt number.
    pub attempt: u32,
    pub control: ExecutionControl,
}

impl ExecutionRequest {
    pub fn is_resumed(&self) -> bool {
        self.resumed_from.is_some()
    }
}

/// Performs operations of one type.
///
/// Implementations should call [`ExecutionControl::wait_while_paused`]
/// between units of work and report progress through the control so a pause
/// can be checkpointed.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError>;
}
