// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Base observer trait for watching scheduler activity.
//!
//! Observers see every [`SchedulerEvent`] without taking part in any
//! decision. Typical uses are logging, telemetry and test assertions.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use interrupt_scheduler::observers::{Observer, SchedulerEvent};
//!
//! struct PrintObserver;
//!
//! #[async_trait]
//! impl Observer for PrintObserver {
//!     async fn on_event(&self, event: &SchedulerEvent) {
//!         println!("{} {:?}", event.name(), event.operation_id());
//!     }
//! }
//! ```

use async_trait::async_trait;

use super::events::SchedulerEvent;

/// Receives scheduler events. The default implementation ignores them.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_event(&self, _event: &SchedulerEvent) {}
}

/// Writes every event to `tracing`.
///
/// `signal_processed` is very chatty, so it is logged at trace level; state
/// changes are logged at info, failures at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

#[async_trait]
impl Observer for LoggingObserver {
    async fn on_event(&self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::MonitoringStarted {
                operation_id,
                operation_name,
                priority,
            } => tracing::info!(
                operation_id = %operation_id,
                %priority,
                "Scheduler: monitoring {}",
                operation_name
            ),
            SchedulerEvent::MonitoringStopped {
                operation_id,
                final_state,
                success,
            } => tracing::info!(
                operation_id = %operation_id,
                %final_state,
                success,
                "Scheduler: monitoring stopped"
            ),
            SchedulerEvent::ToolCallInterrupted {
                operation_id,
                reason,
                confidence,
                retry_count,
                ..
            } => tracing::info!(
                operation_id = %operation_id,
                confidence,
                retry_count,
                "Scheduler: interrupted ({})",
                reason
            ),
            SchedulerEvent::ToolCallResumed {
                operation_id,
                reason,
                interruption_ms,
                ..
            } => tracing::info!(
                operation_id = %operation_id,
                interruption_ms,
                "Scheduler: resumed ({})",
                reason
            ),
            SchedulerEvent::ToolCallCancelled {
                operation_id,
                reason,
            } => tracing::info!(operation_id = %operation_id, "Scheduler: cancelled ({})", reason),
            SchedulerEvent::ToolCallFailed {
                operation_id,
                error,
            } => tracing::warn!(operation_id = %operation_id, "Scheduler: failed: {}", error),
            SchedulerEvent::SignalProcessed {
                operation_id,
                signal_kind,
                decision,
            } => tracing::trace!(
                operation_id = %operation_id,
                %signal_kind,
                interrupt = decision.should_interrupt,
                resume = decision.should_resume,
                "Scheduler: {}",
                decision.reason
            ),
            SchedulerEvent::ConfigUpdated { .. } => {
                tracing::info!("Scheduler: configuration updated")
            }
        }
    }
}
