// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Common re-exports.
//!
//! ```
//! use interrupt_scheduler::prelude::*;
//! ```

pub use std::sync::Arc;

pub use crate::checkpoint::{Checkpoint, CheckpointStore, SharedCheckpointStore};
pub use crate::config::{SchedulerConfig, SchedulerConfigUpdate, VadSensitivity};
pub use crate::lifecycle::{OperationContext, OperationState, Priority};
pub use crate::metrics::{InterruptionMetrics, PerformanceReport};
pub use crate::observers::{EventBus, LoggingObserver, Observer, SchedulerEvent};
pub use crate::runner::{
    ExecutionControl, ExecutionRequest, ExecutorError, OperationExecutor, OperationRequest,
    OperationResult, OperationRunner, RetryPolicy, RunnerConfig,
};
pub use crate::scheduler::{
    CallbackError, InterruptionScheduler, OperationCallbacks, SchedulerError, SignalAction,
    SignalOutcome,
};
pub use crate::signals::{SignalClassifier, SignalDecision, SignalKind, VoiceSignal};
