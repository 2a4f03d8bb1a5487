// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Cooperative pause and cancel handle passed to executors.
//!
//! The runner flips the phase when the scheduler pauses, resumes or cancels
//! the operation. Executors call [`ExecutionControl::wait_while_paused`] at
//! convenient points and report progress so a pause can checkpoint it.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::executor::ExecutorError;
use crate::utils::helpers::clamp_progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Running,
    Paused,
    Cancelled,
}

/// Progress last reported by the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressReport {
    pub progress: Option<f64>,
    pub partial_results: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct ExecutionControl {
    phase: Arc<watch::Sender<ExecutionPhase>>,
    progress: Arc<watch::Sender<ProgressReport>>,
    cancel_token: CancellationToken,
}

impl ExecutionControl {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(ExecutionPhase::Running);
        let (progress, _) = watch::channel(ProgressReport::default());
        Self {
            phase: Arc::new(phase),
            progress: Arc::new(progress),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> ExecutionPhase {
        *self.phase.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.phase() == ExecutionPhase::Paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token cancelled when the operation is cancelled or aborted.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Record progress in `[0, 1]`. Non-finite values are dropped.
    pub fn report_progress(&self, progress: f64) {
        let Some(progress) = clamp_progress(progress) else {
            tracing::warn!("ExecutionControl: ignoring non-finite progress {}", progress);
            return;
        };
        self.progress.send_modify(|report| report.progress = Some(progress));
    }

    pub fn report_partial_results(&self, results: serde_json::Value) {
        self.progress
            .send_modify(|report| report.partial_results = Some(results));
    }

    pub fn progress(&self) -> ProgressReport {
        self.progress.borrow().clone()
    }

    /// Return once the operation is running, or fail if it gets cancelled.
    pub async fn wait_while_paused(&self) -> Result<(), ExecutorError> {
        let mut phase_rx = self.phase.subscribe();
        loop {
            let phase = *phase_rx.borrow_and_update();
            match phase {
                ExecutionPhase::Running => return Ok(()),
                ExecutionPhase::Cancelled => return Err(ExecutorError::Cancelled),
                ExecutionPhase::Paused => {}
            }
            tokio::select! {
                _ = self.cancel_token.cancelled() => return Err(ExecutorError::Cancelled),
                changed = phase_rx.changed() => {
                    if changed.is_err() {
                        return Err(ExecutorError::Cancelled);
                    }
                }
            }
        }
    }

    pub(crate) fn pause(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == ExecutionPhase::Running {
                *phase = ExecutionPhase::Paused;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn resume(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == ExecutionPhase::Paused {
                *phase = ExecutionPhase::Running;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn cancel(&self) {
        self.phase.send_replace(ExecutionPhase::Cancelled);
        self.cancel_token.cancel();
    }
}

impl Default for ExecutionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionControl")
            .field("phase", &self.phase())
            .field("progress", &self.progress.borrow().progress)
            .finish()
    }
}
