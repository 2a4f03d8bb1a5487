// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Operation lifecycle: priority tiers, the operation state machine, and the
//! per-operation context owned by [`LifecycleManager`].

pub mod manager;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::signals::VoiceSignal;
use crate::utils::helpers::clamp_progress;

pub use manager::{ArchivedContext, LifecycleManager};

/// Signals kept per context before trimming.
pub const MAX_RECENT_SIGNALS: usize = 50;
/// Signals left after a trim.
pub const TRIMMED_RECENT_SIGNALS: usize = 25;

/// Errors returned by [`LifecycleManager`] mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("operation {0} is already being monitored")]
    AlreadyActive(String),
    #[error("operation {0} is not active")]
    NotFound(String),
    #[error("operation {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        id: String,
        from: OperationState,
        to: OperationState,
    },
    #[error("operation {id}: retry count {requested} exceeds the maximum of {max}")]
    RetryLimit { id: String, requested: u32, max: u32 },
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Policy bucket controlling whether and for how long an operation may be
/// interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OperationState
// ---------------------------------------------------------------------------

/// Operation states.
///
/// ```text
/// running ──> paused ──> resumed ──> completed
///    │          ▲  │        │
///    │          └──┼────────┘        (resumed may be paused again)
///    └──────────── ┴─> cancelled | failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Running,
    Paused,
    Resumed,
    Cancelled,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }

    /// `true` while the operation is making progress (not paused, not done).
    pub fn is_executing(self) -> bool {
        matches!(self, Self::Running | Self::Resumed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: OperationState) -> bool {
        use OperationState::*;
        match (self, next) {
            (Running | Resumed, Paused) => true,
            (Paused, Resumed) => true,
            (Running | Paused | Resumed, Cancelled | Failed) => true,
            (Running | Resumed, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OperationContext
// ---------------------------------------------------------------------------

/// Everything the scheduler knows about one in-flight operation.
///
/// Contexts live inside [`LifecycleManager`]; everything handed out to callers
/// and callbacks is a clone.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub operation_id: String,
    pub operation_name: String,
    pub parameters: serde_json::Value,
    pub priority: Priority,
    /// When monitoring started. The timeout is measured from here.
    pub start_time: Instant,
    /// Start of the most recent pause.
    pub interrupted_at: Option<Instant>,
    /// End of the most recent pause.
    pub resumed_at: Option<Instant>,
    pub state: OperationState,
    pub partial_results: Option<serde_json::Value>,
    /// Fraction of work done, in `[0, 1]`.
    pub execution_progress: Option<f64>,
    pub checkpoint_data: Option<serde_json::Value>,
    /// Reason given for the most recent transition.
    pub reason: Option<String>,
    /// Bounded tail of routed signals.
    pub recent_signals: Vec<VoiceSignal>,
    /// Signals seen over the whole lifetime, including trimmed ones.
    pub signal_count: u64,
    /// Pauses committed so far.
    pub retry_count: u32,
    /// Pauses allowed by the priority policy.
    pub max_retries: u32,
    /// Lifetime allowed by the priority policy.
    pub timeout: Duration,
    /// Sum of every completed pause (`resumed_at - interrupted_at`).
    pub total_interruption_time: Duration,
}

impl OperationContext {
    pub fn new(
        operation_id: impl Into<String>,
        operation_name: impl Into<String>,
        parameters: serde_json::Value,
        priority: Priority,
        max_retries: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            operation_name: operation_name.into(),
            parameters,
            priority,
            start_time: Instant::now(),
            interrupted_at: None,
            resumed_at: None,
            state: OperationState::Running,
            partial_results: None,
            execution_progress: None,
            checkpoint_data: None,
            reason: None,
            recent_signals: Vec::new(),
            signal_count: 0,
            retry_count: 0,
            max_retries,
            timeout,
            total_interruption_time: Duration::ZERO,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.timeout
    }

    pub fn was_interrupted(&self) -> bool {
        self.retry_count > 0
    }

    /// Length of the most recent completed pause, if any.
    pub fn last_interruption_duration(&self) -> Option<Duration> {
        match (self.interrupted_at, self.resumed_at) {
            (Some(paused), Some(resumed)) if resumed >= paused => Some(resumed - paused),
            _ => None,
        }
    }

    fn push_signal(&mut self, signal: VoiceSignal) {
        self.recent_signals.push(signal);
        self.signal_count += 1;
        if self.recent_signals.len() > MAX_RECENT_SIGNALS {
            let excess = self.recent_signals.len() - TRIMMED_RECENT_SIGNALS;
            self.recent_signals.drain(..excess);
        }
    }
}

/// Extra fields merged into a context by
/// [`LifecycleManager::update_state`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextUpdate {
    pub partial_results: Option<serde_json::Value>,
    pub execution_progress: Option<f64>,
    pub checkpoint_data: Option<serde_json::Value>,
    pub retry_count: Option<u32>,
}

impl ContextUpdate {
    /// Set progress, clamped to `[0, 1]`. Non-finite values leave it unset.
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.execution_progress = clamp_progress(progress);
        self
    }

    pub fn with_partial_results(mut self, results: serde_json::Value) -> Self {
        self.partial_results = Some(results);
        self
    }

    pub fn with_checkpoint_data(mut self, data: serde_json::Value) -> Self {
        self.checkpoint_data = Some(data);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }
}
