// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Scheduler configuration.
//!
//! All settings are plain serde structs with sensible defaults, so a partial
//! JSON document (or no document at all) produces a usable configuration.
//! Every configuration is validated when the scheduler is constructed and
//! again whenever [`SchedulerConfigUpdate`] is applied at runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::Priority;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(field, format!("{value} is not within [0, 1]")));
    }
    Ok(())
}

fn check_positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// VAD sensitivity
// ---------------------------------------------------------------------------

/// Thresholds used by the [`SignalClassifier`](crate::signals::SignalClassifier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSensitivity {
    /// Minimum `voice_start` confidence that triggers an interruption.
    pub voice_threshold: f64,
    /// Trailing silence required before a resume is suggested.
    pub silence_timeout_ms: u64,
    /// Audio level above which a `noise_detected` signal is dampened.
    pub noise_threshold: f64,
    /// Continuous voice longer than this forces an interruption.
    pub continuous_voice_timeout_ms: u64,
}

impl Default for VadSensitivity {
    fn default() -> Self {
        Self {
            voice_threshold: 0.7,
            silence_timeout_ms: 1500,
            noise_threshold: 0.3,
            continuous_voice_timeout_ms: 3000,
        }
    }
}

impl VadSensitivity {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_interval("vad_sensitivity.voice_threshold", self.voice_threshold)?;
        check_unit_interval("vad_sensitivity.noise_threshold", self.noise_threshold)?;
        check_positive("vad_sensitivity.silence_timeout_ms", self.silence_timeout_ms)?;
        check_positive(
            "vad_sensitivity.continuous_voice_timeout_ms",
            self.continuous_voice_timeout_ms,
        )
    }
}

// ---------------------------------------------------------------------------
// Interruption behaviour
// ---------------------------------------------------------------------------

/// Global interruption behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptionSettings {
    /// Master switch; when `false` no operation can be interrupted.
    pub enable_interruptions: bool,
    /// Delay before committing to an interruption, absorbs short voice bursts.
    pub grace_period_ms: u64,
    /// Delay before committing to a resumption.
    pub resume_delay_ms: u64,
    /// Upper bound on interruptions per operation (the context's `max_retries`).
    pub max_interruptions: u32,
}

impl Default for InterruptionSettings {
    fn default() -> Self {
        Self {
            enable_interruptions: true,
            grace_period_ms: 200,
            resume_delay_ms: 500,
            max_interruptions: 3,
        }
    }
}

impl InterruptionSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_interruptions == 0 {
            return Err(ConfigError::invalid(
                "interruption.max_interruptions",
                "must allow at least one interruption",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Priority policies
// ---------------------------------------------------------------------------

/// What the scheduler may do with operations of one priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPolicy {
    pub interruptible: bool,
    pub resumable: bool,
    /// Maximum lifetime of an operation of this tier.
    pub timeout_ms: u64,
}

impl PriorityPolicy {
    pub const fn new(interruptible: bool, resumable: bool, timeout_ms: u64) -> Self {
        Self {
            interruptible,
            resumable,
            timeout_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Policy table indexed by [`Priority`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrioritySettings {
    pub low: PriorityPolicy,
    pub medium: PriorityPolicy,
    pub high: PriorityPolicy,
    pub critical: PriorityPolicy,
}

impl Default for PrioritySettings {
    fn default() -> Self {
        Self {
            low: PriorityPolicy::new(true, true, 30_000),
            medium: PriorityPolicy::new(true, true, 60_000),
            high: PriorityPolicy::new(false, true, 120_000),
            critical: PriorityPolicy::new(false, false, 300_000),
        }
    }
}

impl PrioritySettings {
    pub fn policy(&self, priority: Priority) -> &PriorityPolicy {
        match priority {
            Priority::Low => &self.low,
            Priority::Medium => &self.medium,
            Priority::High => &self.high,
            Priority::Critical => &self.critical,
        }
    }

    pub fn policy_mut(&mut self, priority: Priority) -> &mut PriorityPolicy {
        match priority {
            Priority::Low => &mut self.low,
            Priority::Medium => &mut self.medium,
            Priority::High => &mut self.high,
            Priority::Critical => &mut self.critical,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for priority in Priority::ALL {
            if self.policy(priority).timeout_ms == 0 {
                return Err(ConfigError::invalid(
                    "priority_settings.timeout_ms",
                    format!("timeout for {priority} must be greater than zero"),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Housekeeping
// ---------------------------------------------------------------------------

/// Background maintenance timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    /// Interval of the expiry sweep.
    pub state_cleanup_interval_ms: u64,
    /// How long archived contexts are retained in history.
    pub metrics_retention_time_ms: u64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            state_cleanup_interval_ms: 5_000,
            metrics_retention_time_ms: 300_000,
        }
    }
}

impl PerformanceSettings {
    pub fn state_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.state_cleanup_interval_ms)
    }

    pub fn metrics_retention_time(&self) -> Duration {
        Duration::from_millis(self.metrics_retention_time_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive(
            "performance.state_cleanup_interval_ms",
            self.state_cleanup_interval_ms,
        )?;
        check_positive(
            "performance.metrics_retention_time_ms",
            self.metrics_retention_time_ms,
        )
    }
}

/// Bounds of the in-memory checkpoint store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    pub max_entries: usize,
    pub ttl_ms: u64,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl_ms: 600_000,
        }
    }
}

impl CheckpointSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::invalid(
                "checkpoint.max_entries",
                "must be greater than zero",
            ));
        }
        check_positive("checkpoint.ttl_ms", self.ttl_ms)
    }
}

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Complete scheduler configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub vad_sensitivity: VadSensitivity,
    pub interruption: InterruptionSettings,
    pub priority_settings: PrioritySettings,
    pub performance: PerformanceSettings,
    pub checkpoint: CheckpointSettings,
}

impl SchedulerConfig {
    /// Parse a (possibly partial) JSON document and validate the result.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.vad_sensitivity.validate()?;
        self.interruption.validate()?;
        self.priority_settings.validate()?;
        self.performance.validate()?;
        self.checkpoint.validate()
    }

    /// Return a copy of this configuration with `update` merged in.
    ///
    /// The merged result is validated; `self` is never modified.
    pub fn merged(&self, update: &SchedulerConfigUpdate) -> Result<Self, ConfigError> {
        let mut next = self.clone();

        if let Some(vad) = &update.vad_sensitivity {
            let target = &mut next.vad_sensitivity;
            if let Some(v) = vad.voice_threshold {
                target.voice_threshold = v;
            }
            if let Some(v) = vad.silence_timeout_ms {
                target.silence_timeout_ms = v;
            }
            if let Some(v) = vad.noise_threshold {
                target.noise_threshold = v;
            }
            if let Some(v) = vad.continuous_voice_timeout_ms {
                target.continuous_voice_timeout_ms = v;
            }
        }

        if let Some(interruption) = &update.interruption {
            let target = &mut next.interruption;
            if let Some(v) = interruption.enable_interruptions {
                target.enable_interruptions = v;
            }
            if let Some(v) = interruption.grace_period_ms {
                target.grace_period_ms = v;
            }
            if let Some(v) = interruption.resume_delay_ms {
                target.resume_delay_ms = v;
            }
            if let Some(v) = interruption.max_interruptions {
                target.max_interruptions = v;
            }
        }

        for (priority, policy) in &update.priority_settings {
            *next.priority_settings.policy_mut(*priority) = *policy;
        }

        if let Some(performance) = &update.performance {
            let target = &mut next.performance;
            if let Some(v) = performance.state_cleanup_interval_ms {
                target.state_cleanup_interval_ms = v;
            }
            if let Some(v) = performance.metrics_retention_time_ms {
                target.metrics_retention_time_ms = v;
            }
        }

        next.validate()?;
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSensitivityUpdate {
    pub voice_threshold: Option<f64>,
    pub silence_timeout_ms: Option<u64>,
    pub noise_threshold: Option<f64>,
    pub continuous_voice_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptionSettingsUpdate {
    pub enable_interruptions: Option<bool>,
    pub grace_period_ms: Option<u64>,
    pub resume_delay_ms: Option<u64>,
    pub max_interruptions: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettingsUpdate {
    pub state_cleanup_interval_ms: Option<u64>,
    pub metrics_retention_time_ms: Option<u64>,
}

/// A partial configuration applied with
/// [`InterruptionScheduler::update_config`](crate::scheduler::InterruptionScheduler::update_config).
///
/// Checkpoint bounds are fixed at construction and cannot be updated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfigUpdate {
    pub vad_sensitivity: Option<VadSensitivityUpdate>,
    pub interruption: Option<InterruptionSettingsUpdate>,
    pub priority_settings: Vec<(Priority, PriorityPolicy)>,
    pub performance: Option<PerformanceSettingsUpdate>,
}

impl SchedulerConfigUpdate {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.vad_sensitivity.is_none()
            && self.interruption.is_none()
            && self.priority_settings.is_empty()
            && self.performance.is_none()
    }
}
