// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! The interruption scheduler.
//!
//! [`InterruptionScheduler`] ties the pieces together: each incoming
//! [`VoiceSignal`] is recorded on the operation's context, classified by that
//! operation's [`SignalClassifier`], and, when the [`LifecycleManager`] agrees
//! the operation is eligible, turned into a pause or resume transition.
//!
//! # Transitions
//!
//! Interrupt, resume, cancel and stop are serialized per operation by a
//! transition lock; different operations never block each other. Every
//! handler re-checks eligibility after each suspension point (grace period,
//! resume delay, user callback) before committing, since a concurrent cancel
//! or the expiry sweep may have changed the picture in the meantime.
//!
//! A grace period or resume delay is abandoned when a signal classified
//! during the wait asks for the opposite transition, so a short voice burst
//! followed by silence leaves the operation running.
//!
//! Callbacks run while the transition lock is held and must not start
//! another transition on the same operation. Events are emitted after the
//! lock is released, so listeners may.
//!
//! Cancellation is never policy-gated. It fires the operation's
//! [`CancellationToken`] first, which pre-empts any pending grace period or
//! resume delay, then takes the transition lock.
//!
//! # Maintenance
//!
//! A background task started by [`InterruptionScheduler::new`] runs
//! [`InterruptionScheduler::run_maintenance`] every
//! `performance.state_cleanup_interval_ms`. It holds only a weak reference
//! and exits when the scheduler is shut down or dropped.

pub mod callbacks;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{shared_store, SharedCheckpointStore};
use crate::config::{ConfigError, SchedulerConfig, SchedulerConfigUpdate};
use crate::lifecycle::manager::TIMEOUT_REASON;
use crate::lifecycle::{
    ContextUpdate, LifecycleError, LifecycleManager, OperationContext, OperationState, Priority,
};
use crate::metrics::InterruptionMetrics;
use crate::observers::{EventBus, SchedulerEvent};
use crate::signals::{SignalClassifier, SignalDecision, SignalError, VoiceSignal};

pub use callbacks::{
    CallbackError, ErrorCallback, LifecycleCallback, OperationCallbacks, ProgressProvider,
};

/// Confidence attached to forced transitions.
pub const FORCED_CONFIDENCE: f64 = 1.0;

const RESUME_FOR_COMPLETION_REASON: &str = "Resumed for completion";
const COMPLETED_REASON: &str = "Operation completed";
const SHUTDOWN_REASON: &str = "Scheduler shutdown";

/// Errors returned by [`InterruptionScheduler`].
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("malformed signal for {operation_id}: {source}")]
    MalformedSignal {
        operation_id: String,
        #[source]
        source: SignalError,
    },
    #[error("operation {0} is not monitored")]
    NotMonitored(String),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("{callback} callback failed for {operation_id}: {message}")]
    Callback {
        operation_id: String,
        callback: &'static str,
        message: String,
    },
    #[error("scheduler has been shut down")]
    ShutDown,
    #[error("the scheduler must be created inside a Tokio runtime")]
    Runtime,
}

/// What [`InterruptionScheduler::process_signal`] did with a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    /// The classifier asked for nothing.
    None,
    Interrupted,
    Resumed,
    /// The classifier asked for a transition the operation is not eligible for.
    NotEligible,
    /// The operation became ineligible, or a later signal withdrew the
    /// transition, while it was pending.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalOutcome {
    pub decision: SignalDecision,
    pub action: SignalAction,
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired_operations: usize,
    pub expired_checkpoints: usize,
    pub pruned_history: usize,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct MonitoredOperation {
    callbacks: OperationCallbacks,
    classifier: Mutex<SignalClassifier>,
    transition_lock: Mutex<()>,
    cancel_token: CancellationToken,
    /// Bumped whenever a signal contradicts a transition that may be pending.
    pending_epoch: AtomicU64,
}

impl MonitoredOperation {
    fn epoch(&self) -> u64 {
        self.pending_epoch.load(Ordering::SeqCst)
    }

    fn supersede_pending(&self) {
        self.pending_epoch.fetch_add(1, Ordering::SeqCst);
    }
}

struct SchedulerInner {
    config: RwLock<SchedulerConfig>,
    lifecycle: Mutex<LifecycleManager>,
    operations: RwLock<HashMap<String, Arc<MonitoredOperation>>>,
    checkpoints: SharedCheckpointStore,
    events: EventBus,
    metrics: Mutex<InterruptionMetrics>,
    shut_down: AtomicBool,
    sweeper_token: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.sweeper_token.cancel();
    }
}

enum Committed<T> {
    Yes(T),
    No,
}

// ---------------------------------------------------------------------------
// InterruptionScheduler
// ---------------------------------------------------------------------------

/// Cheaply clonable handle to one scheduler instance.
#[derive(Clone)]
pub struct InterruptionScheduler {
    inner: Arc<SchedulerInner>,
}

impl InterruptionScheduler {
    /// Validate `config` and start the maintenance task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::Runtime)?;

        let inner = Arc::new(SchedulerInner {
            lifecycle: Mutex::new(LifecycleManager::new(&config)),
            checkpoints: shared_store(&config.checkpoint),
            config: RwLock::new(config),
            operations: RwLock::new(HashMap::new()),
            events: EventBus::new(),
            metrics: Mutex::new(InterruptionMetrics::default()),
            shut_down: AtomicBool::new(false),
            sweeper_token: CancellationToken::new(),
            sweeper: Mutex::new(None),
        });

        let handle = runtime.spawn(sweep_loop(Arc::downgrade(&inner), inner.sweeper_token.clone()));
        if let Ok(mut slot) = inner.sweeper.try_lock() {
            *slot = Some(handle);
        }

        tracing::debug!("InterruptionScheduler: started");
        Ok(Self { inner })
    }

    /// The event bus scheduler events are published on.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// The checkpoint store shared with the runner.
    pub fn checkpoints(&self) -> SharedCheckpointStore {
        self.inner.checkpoints.clone()
    }

    pub async fn config(&self) -> SchedulerConfig {
        self.inner.config.read().await.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Monitoring
    // -----------------------------------------------------------------------

    /// Create a running context for `operation_id` and store its callbacks.
    pub async fn start_monitoring(
        &self,
        operation_id: &str,
        operation_name: &str,
        parameters: serde_json::Value,
        priority: Priority,
        callbacks: OperationCallbacks,
    ) -> Result<OperationContext, SchedulerError> {
        self.ensure_running()?;

        let context = self.inner.lifecycle.lock().await.create_context(
            operation_id,
            operation_name,
            parameters,
            priority,
        )?;
        let sensitivity = self.inner.config.read().await.vad_sensitivity.clone();
        let operation = Arc::new(MonitoredOperation {
            callbacks,
            classifier: Mutex::new(SignalClassifier::new(sensitivity)),
            transition_lock: Mutex::new(()),
            cancel_token: CancellationToken::new(),
            pending_epoch: AtomicU64::new(0),
        });
        self.inner
            .operations
            .write()
            .await
            .insert(operation_id.to_string(), operation);
        self.inner.metrics.lock().await.record_monitoring_started();

        // A shutdown that started after `ensure_running` may already have
        // taken its list of operations.
        if self.is_shut_down() {
            let _ = self.cancel(operation_id, SHUTDOWN_REASON).await;
            return Err(SchedulerError::ShutDown);
        }

        self.inner
            .events
            .emit(SchedulerEvent::MonitoringStarted {
                operation_id: operation_id.to_string(),
                operation_name: operation_name.to_string(),
                priority,
            })
            .await;
        Ok(context)
    }

    /// Finish monitoring with the operation's outcome.
    ///
    /// `Ok` completes the operation (resuming it first if it is still
    /// paused) and drops its checkpoint; `Err` fails it. Returns the archived
    /// context.
    pub async fn stop_monitoring(
        &self,
        operation_id: &str,
        outcome: Result<serde_json::Value, String>,
    ) -> Result<OperationContext, SchedulerError> {
        self.ensure_running()?;
        let operation = self.operation(operation_id).await?;
        let transition = operation.transition_lock.lock().await;

        let context = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            let state = lifecycle
                .get(operation_id)
                .map(|c| c.state)
                .ok_or_else(|| SchedulerError::NotMonitored(operation_id.to_string()))?;
            match &outcome {
                Ok(_) => {
                    if state == OperationState::Paused {
                        lifecycle.update_state(
                            operation_id,
                            OperationState::Resumed,
                            RESUME_FOR_COMPLETION_REASON,
                            None,
                        )?;
                    }
                    lifecycle.update_state(
                        operation_id,
                        OperationState::Completed,
                        COMPLETED_REASON,
                        Some(ContextUpdate::default().with_progress(1.0)),
                    )?
                }
                Err(error) => {
                    lifecycle.update_state(operation_id, OperationState::Failed, error, None)?
                }
            }
        };
        self.release(operation_id).await;
        drop(transition);

        let success = outcome.is_ok();
        match outcome {
            Ok(_) => {
                self.inner.checkpoints.lock().await.remove(operation_id);
                self.inner.metrics.lock().await.record_completion();
                if let Some(on_complete) = &operation.callbacks.on_complete {
                    if let Err(e) = on_complete(context.clone()).await {
                        tracing::warn!(
                            operation_id,
                            "InterruptionScheduler: on_complete callback failed: {}",
                            e
                        );
                    }
                }
            }
            Err(error) => {
                self.inner.metrics.lock().await.record_failure();
                if let Some(on_error) = &operation.callbacks.on_error {
                    on_error(context.clone(), error).await;
                }
            }
        }

        self.inner
            .events
            .emit(SchedulerEvent::MonitoringStopped {
                operation_id: operation_id.to_string(),
                final_state: context.state,
                success,
            })
            .await;
        Ok(context)
    }

    pub async fn is_monitoring(&self, operation_id: &str) -> bool {
        self.inner.operations.read().await.contains_key(operation_id)
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    /// Feed one signal to one operation.
    ///
    /// Malformed signals are rejected without touching any state.
    /// Ineligible transitions are reported in the outcome, not as errors.
    pub async fn process_signal(
        &self,
        operation_id: &str,
        signal: VoiceSignal,
    ) -> Result<SignalOutcome, SchedulerError> {
        self.ensure_running()?;
        if let Err(source) = signal.validate() {
            tracing::warn!(
                operation_id,
                kind = %signal.kind,
                "InterruptionScheduler: ignoring malformed signal: {}",
                source
            );
            return Err(SchedulerError::MalformedSignal {
                operation_id: operation_id.to_string(),
                source,
            });
        }
        let operation = self.operation(operation_id).await?;

        let kind = signal.kind;
        let decision = operation.classifier.lock().await.classify(&signal);
        self.inner
            .lifecycle
            .lock()
            .await
            .record_signal(operation_id, signal)
            .map_err(|_| SchedulerError::NotMonitored(operation_id.to_string()))?;
        self.inner.metrics.lock().await.record_signal();

        tracing::trace!(
            operation_id,
            %kind,
            interrupt = decision.should_interrupt,
            resume = decision.should_resume,
            confidence = decision.confidence,
            "InterruptionScheduler: {}",
            decision.reason
        );
        self.inner
            .events
            .emit(SchedulerEvent::SignalProcessed {
                operation_id: operation_id.to_string(),
                signal_kind: kind,
                decision: decision.clone(),
            })
            .await;

        let action = if decision.should_interrupt {
            let (eligible, state) = self.eligibility(operation_id, LifecycleManager::can_interrupt).await;
            if eligible {
                self.interrupt(operation_id, &operation, &decision.reason, decision.confidence, true)
                    .await?
                    .then_action(SignalAction::Interrupted)
            } else {
                if state == Some(OperationState::Paused) {
                    operation.supersede_pending();
                }
                SignalAction::NotEligible
            }
        } else if decision.should_resume {
            let (eligible, state) = self.eligibility(operation_id, LifecycleManager::can_resume).await;
            if eligible {
                self.resume(operation_id, &operation, &decision.reason, decision.confidence, true)
                    .await?
                    .then_action(SignalAction::Resumed)
            } else {
                if state.is_some_and(OperationState::is_executing) {
                    operation.supersede_pending();
                }
                SignalAction::NotEligible
            }
        } else {
            SignalAction::None
        };

        Ok(SignalOutcome { decision, action })
    }

    /// Feed `signal` to every monitored operation concurrently.
    pub async fn process_signal_all(
        &self,
        signal: VoiceSignal,
    ) -> Vec<(String, Result<SignalOutcome, SchedulerError>)> {
        let ids: Vec<String> = self.inner.operations.read().await.keys().cloned().collect();
        let pending = ids.into_iter().map(|id| {
            let signal = signal.clone();
            async move {
                let outcome = self.process_signal(&id, signal).await;
                (id, outcome)
            }
        });
        join_all(pending).await
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Pause `operation_id` after the configured grace period.
    ///
    /// Returns `false` when the operation stopped being eligible before the
    /// pause was committed.
    pub async fn handle_interruption(
        &self,
        operation_id: &str,
        reason: &str,
        confidence: f64,
    ) -> Result<bool, SchedulerError> {
        self.ensure_running()?;
        let operation = self.operation(operation_id).await?;
        Ok(self
            .interrupt(operation_id, &operation, reason, confidence, true)
            .await?
            .is_committed())
    }

    /// Resume `operation_id` after the configured resume delay.
    pub async fn handle_resumption(
        &self,
        operation_id: &str,
        reason: &str,
        confidence: f64,
    ) -> Result<bool, SchedulerError> {
        self.ensure_running()?;
        let operation = self.operation(operation_id).await?;
        Ok(self
            .resume(operation_id, &operation, reason, confidence, true)
            .await?
            .is_committed())
    }

    /// Pause immediately, skipping the classifier and the grace period.
    ///
    /// Still requires the operation to be interruptible.
    pub async fn force_interrupt(&self, operation_id: &str, reason: &str) -> Result<bool, SchedulerError> {
        self.ensure_running()?;
        let operation = self.operation(operation_id).await?;
        if !self.inner.lifecycle.lock().await.can_interrupt(operation_id) {
            return Ok(false);
        }
        Ok(self
            .interrupt(operation_id, &operation, reason, FORCED_CONFIDENCE, false)
            .await?
            .is_committed())
    }

    /// Resume immediately, skipping the classifier and the resume delay.
    pub async fn force_resume(&self, operation_id: &str, reason: &str) -> Result<bool, SchedulerError> {
        self.ensure_running()?;
        let operation = self.operation(operation_id).await?;
        if !self.inner.lifecycle.lock().await.can_resume(operation_id) {
            return Ok(false);
        }
        Ok(self
            .resume(operation_id, &operation, reason, FORCED_CONFIDENCE, false)
            .await?
            .is_committed())
    }

    /// Cancel `operation_id` regardless of its priority.
    ///
    /// Returns `false` when the operation is not (or no longer) monitored.
    pub async fn cancel_tool_call(&self, operation_id: &str, reason: &str) -> Result<bool, SchedulerError> {
        self.ensure_running()?;
        self.cancel(operation_id, reason).await
    }

    // -----------------------------------------------------------------------
    // Queries and configuration
    // -----------------------------------------------------------------------

    /// The active context, or the most recently archived one.
    pub async fn get_status(&self, operation_id: &str) -> Option<OperationContext> {
        let lifecycle = self.inner.lifecycle.lock().await;
        lifecycle
            .get(operation_id)
            .or_else(|| lifecycle.last_archived(operation_id))
            .cloned()
    }

    pub async fn get_active_operations(&self) -> Vec<OperationContext> {
        self.inner
            .lifecycle
            .lock()
            .await
            .active_contexts()
            .cloned()
            .collect()
    }

    /// Archived contexts for `operation_id`, oldest first.
    pub async fn get_history(&self, operation_id: &str) -> Vec<OperationContext> {
        self.inner
            .lifecycle
            .lock()
            .await
            .history(operation_id)
            .into_iter()
            .map(|entry| entry.context)
            .collect()
    }

    pub async fn can_interrupt(&self, operation_id: &str) -> bool {
        self.inner.lifecycle.lock().await.can_interrupt(operation_id)
    }

    pub async fn can_resume(&self, operation_id: &str) -> bool {
        self.inner.lifecycle.lock().await.can_resume(operation_id)
    }

    pub async fn get_metrics(&self) -> InterruptionMetrics {
        self.inner.metrics.lock().await.clone()
    }

    /// Merge `update` into the configuration.
    ///
    /// The merged configuration is validated first; on error nothing changes.
    /// Classifier thresholds of monitored operations are updated in place.
    pub async fn update_config(
        &self,
        update: SchedulerConfigUpdate,
    ) -> Result<SchedulerConfig, SchedulerError> {
        self.ensure_running()?;
        let next = {
            let mut config = self.inner.config.write().await;
            let next = config.merged(&update)?;
            *config = next.clone();
            next
        };
        self.inner.lifecycle.lock().await.apply_config(&next);

        let operations: Vec<Arc<MonitoredOperation>> =
            self.inner.operations.read().await.values().cloned().collect();
        for operation in operations {
            operation
                .classifier
                .lock()
                .await
                .update_sensitivity(next.vad_sensitivity.clone());
        }

        tracing::debug!("InterruptionScheduler: configuration updated");
        self.inner
            .events
            .emit(SchedulerEvent::ConfigUpdated {
                config: Box::new(next.clone()),
            })
            .await;
        Ok(next)
    }

    // -----------------------------------------------------------------------
    // Maintenance and shutdown
    // -----------------------------------------------------------------------

    /// Fail expired operations, drop stale checkpoints and prune history.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let retention = self
            .inner
            .config
            .read()
            .await
            .performance
            .metrics_retention_time();
        let (expired, pruned_history) = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            (lifecycle.sweep_expired(), lifecycle.prune_history(retention))
        };

        for context in &expired {
            let operation = self.release(&context.operation_id).await;
            self.inner.metrics.lock().await.record_failure();
            if let Some(on_error) = operation.as_ref().and_then(|op| op.callbacks.on_error.clone()) {
                on_error(context.clone(), TIMEOUT_REASON.to_string()).await;
            }
            self.inner
                .events
                .emit(SchedulerEvent::ToolCallFailed {
                    operation_id: context.operation_id.clone(),
                    error: TIMEOUT_REASON.to_string(),
                })
                .await;
        }

        let expired_checkpoints = self.inner.checkpoints.lock().await.sweep_expired();
        MaintenanceReport {
            expired_operations: expired.len(),
            expired_checkpoints,
            pruned_history,
        }
    }

    /// Cancel every active operation, stop the maintenance task and detach
    /// all listeners. Later calls fail with [`SchedulerError::ShutDown`].
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("InterruptionScheduler: shutting down");

        let ids: Vec<String> = self.inner.operations.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.cancel(&id, SHUTDOWN_REASON).await {
                tracing::warn!("InterruptionScheduler: failed to cancel {} on shutdown: {}", id, e);
            }
        }

        self.inner.sweeper_token.cancel();
        if let Some(handle) = self.inner.sweeper.lock().await.take() {
            let _ = handle.await;
        }
        self.inner.events.cleanup().await;
        self.inner.events.clear().await;
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn ensure_running(&self) -> Result<(), SchedulerError> {
        if self.is_shut_down() {
            return Err(SchedulerError::ShutDown);
        }
        Ok(())
    }

    async fn operation(&self, operation_id: &str) -> Result<Arc<MonitoredOperation>, SchedulerError> {
        self.inner
            .operations
            .read()
            .await
            .get(operation_id)
            .cloned()
            .ok_or_else(|| SchedulerError::NotMonitored(operation_id.to_string()))
    }

    async fn eligibility(
        &self,
        operation_id: &str,
        check: fn(&LifecycleManager, &str) -> bool,
    ) -> (bool, Option<OperationState>) {
        let lifecycle = self.inner.lifecycle.lock().await;
        (
            check(&lifecycle, operation_id),
            lifecycle.get(operation_id).map(|c| c.state),
        )
    }

    /// Forget a finished operation and fire its token.
    async fn release(&self, operation_id: &str) -> Option<Arc<MonitoredOperation>> {
        let operation = self.inner.operations.write().await.remove(operation_id);
        if let Some(operation) = &operation {
            operation.cancel_token.cancel();
        }
        operation
    }

    /// Sleep for `delay` unless the operation is cancelled first.
    async fn wait(operation: &MonitoredOperation, delay: Duration) -> bool {
        if delay.is_zero() {
            return !operation.cancel_token.is_cancelled();
        }
        tokio::select! {
            _ = operation.cancel_token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn interrupt(
        &self,
        operation_id: &str,
        operation: &MonitoredOperation,
        reason: &str,
        confidence: f64,
        with_grace: bool,
    ) -> Result<Committed<OperationContext>, SchedulerError> {
        let epoch = operation.epoch();
        let transition = operation.transition_lock.lock().await;
        let started = Instant::now();

        let grace = if with_grace {
            self.inner.config.read().await.interruption.grace_period()
        } else {
            Duration::ZERO
        };
        if !Self::wait(operation, grace).await {
            return Ok(Committed::No);
        }
        if with_grace && operation.epoch() != epoch {
            tracing::debug!(operation_id, "InterruptionScheduler: interruption withdrawn by later signal");
            return Ok(Committed::No);
        }

        let snapshot = {
            let lifecycle = self.inner.lifecycle.lock().await;
            if !lifecycle.can_interrupt(operation_id) {
                tracing::debug!(operation_id, "InterruptionScheduler: interruption superseded");
                return Ok(Committed::No);
            }
            match lifecycle.get(operation_id) {
                Some(context) => context.clone(),
                None => return Ok(Committed::No),
            }
        };

        if let Some(on_pause) = &operation.callbacks.on_pause {
            if let Err(e) = on_pause(snapshot.clone()).await {
                return Err(self
                    .callback_failed(operation_id, operation, transition, "on_pause", e)
                    .await);
            }
        }
        if operation.cancel_token.is_cancelled() {
            return Ok(Committed::No);
        }

        let progress = operation.callbacks.current_progress();
        let mut update = ContextUpdate::default().with_retry_count(snapshot.retry_count + 1);
        if let Some(progress) = progress {
            update = update.with_progress(progress);
        }
        let context = match self.inner.lifecycle.lock().await.update_state(
            operation_id,
            OperationState::Paused,
            reason,
            Some(update),
        ) {
            Ok(context) => context,
            Err(LifecycleError::NotFound(_)) => return Ok(Committed::No),
            Err(e) => return Err(e.into()),
        };
        self.inner
            .metrics
            .lock()
            .await
            .record_interruption(started.elapsed());
        drop(transition);

        tracing::debug!(
            operation_id,
            confidence,
            retry_count = context.retry_count,
            "InterruptionScheduler: paused ({})",
            reason
        );
        self.inner
            .events
            .emit(SchedulerEvent::ToolCallInterrupted {
                operation_id: operation_id.to_string(),
                reason: reason.to_string(),
                confidence,
                retry_count: context.retry_count,
                progress,
            })
            .await;
        Ok(Committed::Yes(context))
    }

    async fn resume(
        &self,
        operation_id: &str,
        operation: &MonitoredOperation,
        reason: &str,
        confidence: f64,
        with_delay: bool,
    ) -> Result<Committed<OperationContext>, SchedulerError> {
        let epoch = operation.epoch();
        let transition = operation.transition_lock.lock().await;

        let delay = if with_delay {
            self.inner.config.read().await.interruption.resume_delay()
        } else {
            Duration::ZERO
        };
        if !Self::wait(operation, delay).await {
            return Ok(Committed::No);
        }
        if with_delay && operation.epoch() != epoch {
            tracing::debug!(operation_id, "InterruptionScheduler: resumption withdrawn by later signal");
            return Ok(Committed::No);
        }

        let snapshot = {
            let lifecycle = self.inner.lifecycle.lock().await;
            if !lifecycle.can_resume(operation_id) {
                tracing::debug!(operation_id, "InterruptionScheduler: resumption superseded");
                return Ok(Committed::No);
            }
            match lifecycle.get(operation_id) {
                Some(context) => context.clone(),
                None => return Ok(Committed::No),
            }
        };

        if let Some(on_resume) = &operation.callbacks.on_resume {
            if let Err(e) = on_resume(snapshot).await {
                return Err(self
                    .callback_failed(operation_id, operation, transition, "on_resume", e)
                    .await);
            }
        }
        if operation.cancel_token.is_cancelled() {
            return Ok(Committed::No);
        }

        let context = match self.inner.lifecycle.lock().await.update_state(
            operation_id,
            OperationState::Resumed,
            reason,
            None,
        ) {
            Ok(context) => context,
            Err(LifecycleError::NotFound(_)) => return Ok(Committed::No),
            Err(e) => return Err(e.into()),
        };
        let paused_for = context.last_interruption_duration().unwrap_or_default();
        self.inner.metrics.lock().await.record_resumption(paused_for);
        drop(transition);

        tracing::debug!(
            operation_id,
            confidence,
            paused_ms = paused_for.as_millis() as u64,
            "InterruptionScheduler: resumed ({})",
            reason
        );
        self.inner
            .events
            .emit(SchedulerEvent::ToolCallResumed {
                operation_id: operation_id.to_string(),
                reason: reason.to_string(),
                confidence,
                interruption_ms: paused_for.as_millis() as u64,
            })
            .await;
        Ok(Committed::Yes(context))
    }

    async fn cancel(&self, operation_id: &str, reason: &str) -> Result<bool, SchedulerError> {
        let Ok(operation) = self.operation(operation_id).await else {
            return Ok(false);
        };
        operation.cancel_token.cancel();
        let transition = operation.transition_lock.lock().await;

        let Some(snapshot) = self.inner.lifecycle.lock().await.get(operation_id).cloned() else {
            return Ok(false);
        };
        if let Some(on_cancel) = &operation.callbacks.on_cancel {
            if let Err(e) = on_cancel(snapshot).await {
                return Err(self
                    .callback_failed(operation_id, &operation, transition, "on_cancel", e)
                    .await);
            }
        }

        match self.inner.lifecycle.lock().await.update_state(
            operation_id,
            OperationState::Cancelled,
            reason,
            None,
        ) {
            Ok(_) => {}
            Err(LifecycleError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        self.release(operation_id).await;
        self.inner.checkpoints.lock().await.remove(operation_id);
        self.inner.metrics.lock().await.record_cancellation();
        drop(transition);

        tracing::debug!(operation_id, "InterruptionScheduler: cancelled ({})", reason);
        self.inner
            .events
            .emit(SchedulerEvent::ToolCallCancelled {
                operation_id: operation_id.to_string(),
                reason: reason.to_string(),
            })
            .await;
        Ok(true)
    }

    /// Fail the operation after a callback error and report it.
    async fn callback_failed(
        &self,
        operation_id: &str,
        operation: &MonitoredOperation,
        transition: MutexGuard<'_, ()>,
        callback: &'static str,
        error: CallbackError,
    ) -> SchedulerError {
        let message = error.to_string();
        tracing::warn!(operation_id, "InterruptionScheduler: {} failed: {}", callback, message);

        let failed = self.inner.lifecycle.lock().await.update_state(
            operation_id,
            OperationState::Failed,
            &format!("{callback} failed: {message}"),
            None,
        );
        self.release(operation_id).await;
        self.inner.metrics.lock().await.record_failure();
        drop(transition);

        if let (Ok(context), Some(on_error)) = (failed, &operation.callbacks.on_error) {
            on_error(context, message.clone()).await;
        }
        self.inner
            .events
            .emit(SchedulerEvent::ToolCallFailed {
                operation_id: operation_id.to_string(),
                error: message.clone(),
            })
            .await;

        SchedulerError::Callback {
            operation_id: operation_id.to_string(),
            callback,
            message,
        }
    }
}

impl<T> Committed<T> {
    fn is_committed(&self) -> bool {
        matches!(self, Self::Yes(_))
    }

    fn then_action(self, action: SignalAction) -> SignalAction {
        match self {
            Self::Yes(_) => action,
            Self::No => SignalAction::Superseded,
        }
    }
}

impl fmt::Debug for InterruptionScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptionScheduler")
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

async fn sweep_loop(inner: Weak<SchedulerInner>, token: CancellationToken) {
    loop {
        let interval = match inner.upgrade() {
            Some(inner) => inner.config.read().await.performance.state_cleanup_interval(),
            None => break,
        };
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let report = InterruptionScheduler { inner }.run_maintenance().await;
        if report.expired_operations > 0 || report.expired_checkpoints > 0 {
            tracing::debug!(
                expired_operations = report.expired_operations,
                expired_checkpoints = report.expired_checkpoints,
                pruned_history = report.pruned_history,
                "InterruptionScheduler: maintenance pass"
            );
        }
    }
    tracing::trace!("InterruptionScheduler: maintenance task stopped");
}
