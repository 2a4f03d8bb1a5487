// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Interruption-aware operation runner.
//!
//! [`OperationRunner`] wraps an externally supplied [`OperationExecutor`]
//! with everything the scheduler needs: it starts monitoring, wires pause,
//! resume and cancel callbacks to an [`ExecutionControl`], checkpoints
//! progress on pause, retries failed attempts with exponential backoff, and
//! always answers with a structured [`OperationResult`].

pub mod control;
pub mod executor;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::checkpoint::Checkpoint;
use crate::lifecycle::{OperationContext, OperationState, Priority};
use crate::metrics::{PerformanceMonitor, PerformanceReport, RunRecord, DEFAULT_PERFORMANCE_WINDOW};
use crate::scheduler::{InterruptionScheduler, OperationCallbacks};
use crate::utils::helpers::generate_unique_id;

pub use control::{ExecutionControl, ExecutionPhase, ProgressReport};
pub use executor::{ExecutionRequest, ExecutorError, OperationExecutor};

/// Errors raised while building a runner.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunnerError {
    #[error("at least one executor must be registered")]
    NoExecutors,
    #[error("invalid runner configuration: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Exponential backoff between failed attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Growth factor applied per attempt. At least 1.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// `min(base * multiplier^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(raw.min(self.max_delay_ms as f64) as u64)
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(RunnerError::Config(format!(
                "retry.multiplier must be at least 1, got {}",
                self.multiplier
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(RunnerError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Runner-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Register runs with the scheduler so they can be paused.
    pub enable_interruption: bool,
    /// Route voice signals to runs. Both flags must be set for monitoring.
    pub enable_signal_monitoring: bool,
    /// Priority used when neither the request nor its type names one.
    pub default_priority: Priority,
    /// Priority per operation type, used when a request names none.
    pub operation_priorities: HashMap<String, Priority>,
    /// Backoff between failed attempts.
    pub retry: RetryPolicy,
    /// Runs kept for [`OperationRunner::performance_report`].
    pub performance_window: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            enable_interruption: true,
            enable_signal_monitoring: true,
            default_priority: Priority::Medium,
            operation_priorities: HashMap::new(),
            retry: RetryPolicy::default(),
            performance_window: DEFAULT_PERFORMANCE_WINDOW,
        }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.performance_window == 0 {
            return Err(RunnerError::Config(
                "performance_window must be greater than zero".to_string(),
            ));
        }
        self.retry.validate()
    }
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptionOptions {
    /// Save a checkpoint whenever the operation is paused.
    pub persist_checkpoint: bool,
}

impl Default for InterruptionOptions {
    fn default() -> Self {
        Self {
            persist_checkpoint: true,
        }
    }
}

/// One unit of work handed to [`OperationRunner::run`].
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// Generated from the operation type when absent.
    pub operation_id: Option<String>,
    /// Selects the registered executor.
    pub operation_type: String,
    /// Human-readable name. Defaults to the operation type.
    pub operation_name: String,
    /// Passed through to the executor and stored in checkpoints.
    pub parameters: serde_json::Value,
    /// Overrides the per-type and default priority.
    pub priority: Option<Priority>,
    pub options: InterruptionOptions,
}

impl OperationRequest {
    pub fn new(operation_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        let operation_type = operation_type.into();
        Self {
            operation_id: None,
            operation_name: operation_type.clone(),
            operation_type,
            parameters,
            priority: None,
            options: InterruptionOptions::default(),
        }
    }

    pub fn with_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = operation_name.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn persist_checkpoint(mut self, persist: bool) -> Self {
        self.options.persist_checkpoint = persist;
        self
    }
}

/// How the scheduler treated a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterruptionMetadata {
    /// Paused at least once.
    pub was_interrupted: bool,
    /// Pauses committed over the run.
    pub interruption_count: u32,
    /// Time spent paused, summed over every completed pause.
    pub total_interruption_time: Duration,
    /// `None` when the run was not monitored.
    pub final_state: Option<OperationState>,
    /// Voice signals routed to the operation.
    pub signal_count: u64,
}

impl InterruptionMetadata {
    fn from_context(context: &OperationContext) -> Self {
        Self {
            was_interrupted: context.was_interrupted(),
            interruption_count: context.retry_count,
            total_interruption_time: context.total_interruption_time,
            final_state: Some(context.state),
            signal_count: context.signal_count,
        }
    }
}

/// Outcome of [`OperationRunner::run`]. Failures are reported here, never
/// as an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub operation_id: String,
    pub success: bool,
    /// Executor output on success.
    pub data: Option<serde_json::Value>,
    /// Last error, cancellation or timeout reason on failure.
    pub error: Option<String>,
    /// Executor invocations made.
    pub attempts: u32,
    /// Backoff waits between attempts, in order.
    pub retry_delays: Vec<Duration>,
    /// Wall time from `run` to result, pauses and backoff included.
    pub execution_time: Duration,
    pub interruption: InterruptionMetadata,
}

impl OperationResult {
    fn rejected(operation_id: String, error: String, execution_time: Duration) -> Self {
        Self {
            operation_id,
            success: false,
            data: None,
            error: Some(error),
            attempts: 0,
            retry_delays: Vec::new(),
            execution_time,
            interruption: InterruptionMetadata::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Shared between a run and the callbacks it registers.
#[derive(Default)]
struct RunTracking {
    control: ExecutionControl,
    pauses: Mutex<PauseClock>,
    abort_reason: Mutex<Option<String>>,
}

#[derive(Default)]
struct PauseClock {
    paused_at: Option<Instant>,
    total: Duration,
}

impl PauseClock {
    fn elapsed_total(&self) -> Duration {
        self.total + self.paused_at.map(|at| at.elapsed()).unwrap_or_default()
    }
}

pub struct OperationRunnerBuilder {
    scheduler: InterruptionScheduler,
    executors: HashMap<String, Arc<dyn OperationExecutor>>,
    config: RunnerConfig,
}

impl OperationRunnerBuilder {
    /// Register `executor` for requests of `operation_type`.
    pub fn executor(
        mut self,
        operation_type: impl Into<String>,
        executor: Arc<dyn OperationExecutor>,
    ) -> Self {
        self.executors.insert(operation_type.into(), executor);
        self
    }

    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<OperationRunner, RunnerError> {
        if self.executors.is_empty() {
            return Err(RunnerError::NoExecutors);
        }
        self.config.validate()?;
        Ok(OperationRunner {
            performance: Mutex::new(PerformanceMonitor::new(self.config.performance_window)),
            scheduler: self.scheduler,
            executors: self.executors,
            config: self.config,
        })
    }
}

pub struct OperationRunner {
    scheduler: InterruptionScheduler,
    executors: HashMap<String, Arc<dyn OperationExecutor>>,
    config: RunnerConfig,
    performance: Mutex<PerformanceMonitor>,
}

impl OperationRunner {
    pub fn builder(scheduler: InterruptionScheduler) -> OperationRunnerBuilder {
        OperationRunnerBuilder {
            scheduler,
            executors: HashMap::new(),
            config: RunnerConfig::default(),
        }
    }

    pub fn scheduler(&self) -> &InterruptionScheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub async fn performance_report(&self) -> PerformanceReport {
        self.performance.lock().await.report()
    }

    /// Priority for `request`: explicit override, then the per-type
    /// override, then the configured default.
    pub fn resolve_priority(&self, request: &OperationRequest) -> Priority {
        request
            .priority
            .or_else(|| self.config.operation_priorities.get(&request.operation_type).copied())
            .unwrap_or(self.config.default_priority)
    }

    /// Run `request` to completion.
    ///
    /// Never fails: executor errors, cancellation and timeouts all come back
    /// as an unsuccessful [`OperationResult`].
    pub async fn run(&self, request: OperationRequest) -> OperationResult {
        let started = Instant::now();
        let operation_id = request
            .operation_id
            .clone()
            .unwrap_or_else(|| generate_unique_id(&request.operation_type));

        let Some(executor) = self.executors.get(&request.operation_type).cloned() else {
            let error = format!("no executor registered for {}", request.operation_type);
            tracing::warn!(operation_id = %operation_id, "OperationRunner: {}", error);
            let result = OperationResult::rejected(operation_id, error, started.elapsed());
            self.record(&result, None, Duration::ZERO).await;
            return result;
        };

        let priority = self.resolve_priority(&request);
        let persist = request.options.persist_checkpoint;
        let monitored = self.config.enable_interruption && self.config.enable_signal_monitoring;
        let tracking = Arc::new(RunTracking::default());

        if monitored {
            if let Err(e) = self
                .scheduler
                .start_monitoring(
                    &operation_id,
                    &request.operation_name,
                    request.parameters.clone(),
                    priority,
                    self.callbacks(&tracking, persist),
                )
                .await
            {
                tracing::warn!(operation_id = %operation_id, "OperationRunner: cannot monitor: {}", e);
                let result = OperationResult::rejected(operation_id, e.to_string(), started.elapsed());
                self.record(&result, None, Duration::ZERO).await;
                return result;
            }
        }

        tracing::debug!(
            operation_id = %operation_id,
            operation_type = %request.operation_type,
            %priority,
            monitored,
            "OperationRunner: starting"
        );
        let (outcome, attempts, retry_delays) = self
            .attempt_loop(&operation_id, &request, executor.as_ref(), &tracking, persist)
            .await;

        let error = match &outcome {
            Ok(_) => None,
            Err(ExecutorError::Cancelled) => Some(
                tracking
                    .abort_reason
                    .lock()
                    .await
                    .clone()
                    .unwrap_or_else(|| ExecutorError::Cancelled.to_string()),
            ),
            Err(e) => Some(e.to_string()),
        };

        let final_context = if monitored {
            self.finish_monitoring(&operation_id, &outcome, error.as_deref())
                .await
        } else {
            None
        };

        let pause_time = tracking.pauses.lock().await.elapsed_total();
        let backoff_time: Duration = retry_delays.iter().sum();
        let result = OperationResult {
            operation_id,
            success: outcome.is_ok(),
            data: outcome.ok(),
            error,
            attempts,
            retry_delays,
            execution_time: started.elapsed(),
            interruption: final_context
                .as_ref()
                .map(InterruptionMetadata::from_context)
                .unwrap_or_default(),
        };
        self.record(&result, final_context.map(|c| c.state), pause_time + backoff_time)
            .await;

        tracing::info!(
            operation_id = %result.operation_id,
            success = result.success,
            attempts = result.attempts,
            interruptions = result.interruption.interruption_count,
            elapsed_ms = result.execution_time.as_millis() as u64,
            "OperationRunner: finished"
        );
        result
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    async fn attempt_loop(
        &self,
        operation_id: &str,
        request: &OperationRequest,
        executor: &dyn OperationExecutor,
        tracking: &RunTracking,
        persist: bool,
    ) -> (Result<serde_json::Value, ExecutorError>, u32, Vec<Duration>) {
        let control = &tracking.control;
        let policy = &self.config.retry;
        let mut retry_delays = Vec::new();
        let mut attempt = 0;

        loop {
            if let Err(e) = control.wait_while_paused().await {
                return (Err(e), attempt, retry_delays);
            }

            let resumed_from = if persist {
                self.scheduler
                    .checkpoints()
                    .lock()
                    .await
                    .get(operation_id)
                    .cloned()
            } else {
                None
            };
            if let Some(checkpoint) = &resumed_from {
                tracing::debug!(
                    operation_id,
                    progress = ?checkpoint.progress,
                    "OperationRunner: resuming from checkpoint"
                );
            }

            let execution = ExecutionRequest {
                operation_id: operation_id.to_string(),
                operation_name: request.operation_name.clone(),
                operation_type: request.operation_type.clone(),
                parameters: request.parameters.clone(),
                resumed_from,
                attempt,
                control: control.clone(),
            };
            let result = tokio::select! {
                biased;
                _ = control.cancellation_token().cancelled() => Err(ExecutorError::Cancelled),
                result = executor.execute(execution) => result,
            };
            attempt += 1;

            let error = match result {
                Ok(value) => return (Ok(value), attempt, retry_delays),
                Err(ExecutorError::Cancelled) => {
                    return (Err(ExecutorError::Cancelled), attempt, retry_delays)
                }
                Err(error) => error,
            };
            if attempt > policy.max_retries {
                tracing::warn!(
                    operation_id,
                    attempts = attempt,
                    error = %error,
                    "OperationRunner: retries exhausted"
                );
                return (Err(error), attempt, retry_delays);
            }

            let delay = policy.delay_for_attempt(attempt - 1);
            tracing::warn!(
                operation_id,
                attempt,
                max_retries = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "OperationRunner: retrying after failure"
            );
            retry_delays.push(delay);
            tokio::select! {
                _ = control.cancellation_token().cancelled() => {
                    return (Err(ExecutorError::Cancelled), attempt, retry_delays);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn callbacks(&self, tracking: &Arc<RunTracking>, persist: bool) -> OperationCallbacks {
        let checkpoints = self.scheduler.checkpoints();
        let on_pause = {
            let tracking = tracking.clone();
            let checkpoints = checkpoints.clone();
            move |ctx: OperationContext| {
                let tracking = tracking.clone();
                let checkpoints = checkpoints.clone();
                async move {
                    tracking.control.pause();
                    tracking.pauses.lock().await.paused_at = Some(Instant::now());
                    if persist {
                        let report = tracking.control.progress();
                        let checkpoint =
                            Checkpoint::new(ctx.operation_id, ctx.operation_name, ctx.parameters)
                                .with_progress(report.progress)
                                .with_partial_results(report.partial_results);
                        checkpoints.lock().await.save(checkpoint);
                    }
                    Ok(())
                }
            }
        };
        let on_resume = {
            let tracking = tracking.clone();
            move |_ctx: OperationContext| {
                let tracking = tracking.clone();
                async move {
                    {
                        let mut pauses = tracking.pauses.lock().await;
                        if let Some(at) = pauses.paused_at.take() {
                            pauses.total += at.elapsed();
                        }
                    }
                    tracking.control.resume();
                    Ok(())
                }
            }
        };
        let on_cancel = {
            let tracking = tracking.clone();
            let checkpoints = checkpoints.clone();
            move |ctx: OperationContext| {
                let tracking = tracking.clone();
                let checkpoints = checkpoints.clone();
                async move {
                    tracking.control.cancel();
                    checkpoints.lock().await.remove(&ctx.operation_id);
                    Ok(())
                }
            }
        };
        let on_error = {
            let tracking = tracking.clone();
            move |_ctx: OperationContext, error: String| {
                let tracking = tracking.clone();
                async move {
                    if !tracking.control.is_cancelled() {
                        *tracking.abort_reason.lock().await = Some(error);
                        tracking.control.cancel();
                    }
                }
            }
        };
        let progress = {
            let control = tracking.control.clone();
            move || control.progress().progress
        };

        OperationCallbacks::new()
            .on_pause(on_pause)
            .on_resume(on_resume)
            .on_cancel(on_cancel)
            .on_error(on_error)
            .progress(progress)
    }

    /// Stop monitoring if the scheduler still tracks the operation, and
    /// return its final context either way.
    async fn finish_monitoring(
        &self,
        operation_id: &str,
        outcome: &Result<serde_json::Value, ExecutorError>,
        error: Option<&str>,
    ) -> Option<OperationContext> {
        if self.scheduler.is_monitoring(operation_id).await {
            let stop = match outcome {
                Ok(value) => Ok(value.clone()),
                Err(_) => Err(error.unwrap_or("operation failed").to_string()),
            };
            match self.scheduler.stop_monitoring(operation_id, stop).await {
                Ok(context) => return Some(context),
                Err(e) => {
                    tracing::warn!(operation_id, "OperationRunner: failed to stop monitoring: {}", e)
                }
            }
        }
        self.scheduler.get_status(operation_id).await
    }

    async fn record(
        &self,
        result: &OperationResult,
        final_state: Option<OperationState>,
        interruption_overhead: Duration,
    ) {
        self.performance.lock().await.record(RunRecord {
            was_interrupted: result.interruption.was_interrupted,
            execution_time: result.execution_time,
            interruption_overhead,
            success: result.success,
            final_state,
        });
    }
}

impl fmt::Debug for OperationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.executors.keys().collect();
        types.sort();
        f.debug_struct("OperationRunner")
            .field("executors", &types)
            .field("config", &self.config)
            .finish()
    }
}
