// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Events published by the scheduler.

use serde::Serialize;

use crate::config::SchedulerConfig;
use crate::lifecycle::{OperationState, Priority};
use crate::signals::{SignalDecision, SignalKind};

pub const MONITORING_STARTED: &str = "monitoring_started";
pub const MONITORING_STOPPED: &str = "monitoring_stopped";
pub const TOOL_CALL_INTERRUPTED: &str = "tool_call_interrupted";
pub const TOOL_CALL_RESUMED: &str = "tool_call_resumed";
pub const TOOL_CALL_CANCELLED: &str = "tool_call_cancelled";
pub const TOOL_CALL_FAILED: &str = "tool_call_failed";
pub const SIGNAL_PROCESSED: &str = "signal_processed";
pub const CONFIG_UPDATED: &str = "config_updated";

/// Every event name a listener can subscribe to.
pub const EVENT_NAMES: [&str; 8] = [
    MONITORING_STARTED,
    MONITORING_STOPPED,
    TOOL_CALL_INTERRUPTED,
    TOOL_CALL_RESUMED,
    TOOL_CALL_CANCELLED,
    TOOL_CALL_FAILED,
    SIGNAL_PROCESSED,
    CONFIG_UPDATED,
];

/// A scheduler event. Serializes with a `type` tag carrying the event name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    MonitoringStarted {
        operation_id: String,
        operation_name: String,
        priority: Priority,
    },
    MonitoringStopped {
        operation_id: String,
        final_state: OperationState,
        success: bool,
    },
    ToolCallInterrupted {
        operation_id: String,
        reason: String,
        confidence: f64,
        retry_count: u32,
        progress: Option<f64>,
    },
    ToolCallResumed {
        operation_id: String,
        reason: String,
        confidence: f64,
        /// Length of the pause that just ended.
        interruption_ms: u64,
    },
    ToolCallCancelled {
        operation_id: String,
        reason: String,
    },
    ToolCallFailed {
        operation_id: String,
        error: String,
    },
    SignalProcessed {
        operation_id: String,
        signal_kind: SignalKind,
        decision: SignalDecision,
    },
    ConfigUpdated {
        config: Box<SchedulerConfig>,
    },
}

impl SchedulerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MonitoringStarted { .. } => MONITORING_STARTED,
            Self::MonitoringStopped { .. } => MONITORING_STOPPED,
            Self::ToolCallInterrupted { .. } => TOOL_CALL_INTERRUPTED,
            Self::ToolCallResumed { .. } => TOOL_CALL_RESUMED,
            Self::ToolCallCancelled { .. } => TOOL_CALL_CANCELLED,
            Self::ToolCallFailed { .. } => TOOL_CALL_FAILED,
            Self::SignalProcessed { .. } => SIGNAL_PROCESSED,
            Self::ConfigUpdated { .. } => CONFIG_UPDATED,
        }
    }

    /// The operation this event is about, if any.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Self::MonitoringStarted { operation_id, .. }
            | Self::MonitoringStopped { operation_id, .. }
            | Self::ToolCallInterrupted { operation_id, .. }
            | Self::ToolCallResumed { operation_id, .. }
            | Self::ToolCallCancelled { operation_id, .. }
            | Self::ToolCallFailed { operation_id, .. }
            | Self::SignalProcessed { operation_id, .. } => Some(operation_id.as_str()),
            Self::ConfigUpdated { .. } => None,
        }
    }
}
