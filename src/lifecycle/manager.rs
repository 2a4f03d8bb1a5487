// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Ownership of every operation context.
//!
//! [`LifecycleManager`] is the only place where a context's state changes.
//! It enforces the state machine, the priority policy table and the retry
//! bound, expires stale operations, and moves terminal contexts into a
//! bounded per-operation history.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{PrioritySettings, SchedulerConfig};
use crate::lifecycle::{
    ContextUpdate, LifecycleError, OperationContext, OperationState, Priority,
};
use crate::signals::VoiceSignal;

/// Archived entries kept per operation id.
pub const HISTORY_LIMIT: usize = 10;

/// Reason recorded when the expiry sweep fails an operation.
pub const TIMEOUT_REASON: &str = "Timeout exceeded";

/// A context that reached a terminal state.
#[derive(Debug, Clone)]
pub struct ArchivedContext {
    pub context: OperationContext,
    pub archived_at: Instant,
}

pub struct LifecycleManager {
    policies: PrioritySettings,
    max_retries: u32,
    interruptions_enabled: bool,
    active: HashMap<String, OperationContext>,
    history: HashMap<String, VecDeque<ArchivedContext>>,
}

impl LifecycleManager {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            policies: config.priority_settings.clone(),
            max_retries: config.interruption.max_interruptions,
            interruptions_enabled: config.interruption.enable_interruptions,
            active: HashMap::new(),
            history: HashMap::new(),
        }
    }

    /// Pick up policy, retry bound and the global switch from `config`.
    ///
    /// Contexts that already exist keep the retry bound and timeout they were
    /// created with.
    pub fn apply_config(&mut self, config: &SchedulerConfig) {
        self.update_policies(config.priority_settings.clone());
        self.max_retries = config.interruption.max_interruptions;
        self.interruptions_enabled = config.interruption.enable_interruptions;
    }

    pub fn set_interruptions_enabled(&mut self, enabled: bool) {
        self.interruptions_enabled = enabled;
    }

    pub fn interruptions_enabled(&self) -> bool {
        self.interruptions_enabled
    }

    pub fn policies(&self) -> &PrioritySettings {
        &self.policies
    }

    pub fn update_policies(&mut self, policies: PrioritySettings) {
        self.policies = policies;
    }

    // -----------------------------------------------------------------------
    // Creation and mutation
    // -----------------------------------------------------------------------

    /// Create a running context for `operation_id`.
    pub fn create_context(
        &mut self,
        operation_id: &str,
        operation_name: &str,
        parameters: serde_json::Value,
        priority: Priority,
    ) -> Result<OperationContext, LifecycleError> {
        if self.active.contains_key(operation_id) {
            return Err(LifecycleError::AlreadyActive(operation_id.to_string()));
        }

        let timeout = self.policies.policy(priority).timeout();
        let context = OperationContext::new(
            operation_id,
            operation_name,
            parameters,
            priority,
            self.max_retries,
            timeout,
        );
        tracing::debug!(
            operation_id,
            operation_name,
            %priority,
            timeout_ms = timeout.as_millis() as u64,
            "LifecycleManager: context created"
        );
        self.active.insert(operation_id.to_string(), context.clone());
        Ok(context)
    }

    /// Move `operation_id` to `new_state`, merging `extra` into the context.
    ///
    /// Terminal states archive the context immediately. Returns the updated
    /// context.
    pub fn update_state(
        &mut self,
        operation_id: &str,
        new_state: OperationState,
        reason: &str,
        extra: Option<ContextUpdate>,
    ) -> Result<OperationContext, LifecycleError> {
        let context = self
            .active
            .get_mut(operation_id)
            .ok_or_else(|| LifecycleError::NotFound(operation_id.to_string()))?;

        let from = context.state;
        if !from.can_transition_to(new_state) {
            return Err(LifecycleError::InvalidTransition {
                id: operation_id.to_string(),
                from,
                to: new_state,
            });
        }
        if let Some(requested) = extra.as_ref().and_then(|e| e.retry_count) {
            if requested > context.max_retries {
                return Err(LifecycleError::RetryLimit {
                    id: operation_id.to_string(),
                    requested,
                    max: context.max_retries,
                });
            }
        }

        let now = Instant::now();
        match new_state {
            OperationState::Paused => {
                context.interrupted_at = Some(now);
            }
            OperationState::Resumed => {
                context.resumed_at = Some(now);
                if let Some(paused) = context.last_interruption_duration() {
                    context.total_interruption_time += paused;
                }
            }
            _ => {}
        }
        context.state = new_state;
        context.reason = Some(reason.to_string());

        if let Some(extra) = extra {
            if let Some(results) = extra.partial_results {
                context.partial_results = Some(results);
            }
            if let Some(progress) = extra.execution_progress {
                context.execution_progress = Some(progress);
            }
            if let Some(data) = extra.checkpoint_data {
                context.checkpoint_data = Some(data);
            }
            if let Some(retry_count) = extra.retry_count {
                context.retry_count = retry_count;
            }
        }

        tracing::debug!(
            operation_id,
            %from,
            to = %new_state,
            reason,
            "LifecycleManager: state transition"
        );

        let snapshot = context.clone();
        if new_state.is_terminal() {
            self.archive(operation_id);
        }
        Ok(snapshot)
    }

    /// Append a signal to the context's bounded signal list.
    pub fn record_signal(
        &mut self,
        operation_id: &str,
        signal: VoiceSignal,
    ) -> Result<(), LifecycleError> {
        let context = self
            .active
            .get_mut(operation_id)
            .ok_or_else(|| LifecycleError::NotFound(operation_id.to_string()))?;
        context.push_signal(signal);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Eligibility
    // -----------------------------------------------------------------------

    /// Whether `operation_id` may be paused right now.
    ///
    /// `resumed` counts as executing, so an operation can be interrupted again
    /// after a resume until its retry budget is spent.
    pub fn can_interrupt(&self, operation_id: &str) -> bool {
        let Some(context) = self.active.get(operation_id) else {
            return false;
        };
        self.interruptions_enabled
            && self.policies.policy(context.priority).interruptible
            && context.state.is_executing()
            && context.retry_count < context.max_retries
    }

    /// Whether `operation_id` may be resumed right now.
    pub fn can_resume(&self, operation_id: &str) -> bool {
        let Some(context) = self.active.get(operation_id) else {
            return false;
        };
        self.policies.policy(context.priority).resumable
            && context.state == OperationState::Paused
            && context.elapsed() < context.timeout
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, operation_id: &str) -> Option<&OperationContext> {
        self.active.get(operation_id)
    }

    pub fn is_active(&self, operation_id: &str) -> bool {
        self.active.contains_key(operation_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_contexts(&self) -> impl Iterator<Item = &OperationContext> {
        self.active.values()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    /// Archived contexts for `operation_id`, oldest first.
    pub fn history(&self, operation_id: &str) -> Vec<ArchivedContext> {
        self.history
            .get(operation_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The most recently archived context for `operation_id`.
    pub fn last_archived(&self, operation_id: &str) -> Option<&OperationContext> {
        self.history
            .get(operation_id)
            .and_then(|entries| entries.back())
            .map(|entry| &entry.context)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Fail every active context that outlived its timeout.
    ///
    /// Returns the failed (now archived) contexts.
    pub fn sweep_expired(&mut self) -> Vec<OperationContext> {
        let expired: Vec<String> = self
            .active
            .values()
            .filter(|context| context.is_expired())
            .map(|context| context.operation_id.clone())
            .collect();

        let mut failed = Vec::with_capacity(expired.len());
        for operation_id in expired {
            match self.update_state(&operation_id, OperationState::Failed, TIMEOUT_REASON, None) {
                Ok(context) => {
                    tracing::warn!(
                        operation_id = %operation_id,
                        elapsed_ms = context.elapsed().as_millis() as u64,
                        "LifecycleManager: operation timed out"
                    );
                    failed.push(context);
                }
                Err(e) => tracing::warn!("LifecycleManager: failed to expire {}: {}", operation_id, e),
            }
        }
        failed
    }

    /// Drop archived entries older than `retention`. Returns how many were
    /// removed.
    pub fn prune_history(&mut self, retention: Duration) -> usize {
        let mut removed = 0;
        self.history.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|entry| entry.archived_at.elapsed() <= retention);
            removed += before - entries.len();
            !entries.is_empty()
        });
        if removed > 0 {
            tracing::trace!(removed, "LifecycleManager: pruned history");
        }
        removed
    }

    fn archive(&mut self, operation_id: &str) {
        let Some(context) = self.active.remove(operation_id) else {
            return;
        };
        let entries = self.history.entry(operation_id.to_string()).or_default();
        if entries.len() == HISTORY_LIMIT {
            entries.pop_front();
        }
        entries.push_back(ArchivedContext {
            context,
            archived_at: Instant::now(),
        });
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("active", &self.active.len())
            .field("archived_ids", &self.history.len())
            .field("max_retries", &self.max_retries)
            .field("interruptions_enabled", &self.interruptions_enabled)
            .finish()
    }
}
