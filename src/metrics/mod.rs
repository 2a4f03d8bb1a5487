// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Metrics for the scheduler and the runner.
//!
//! [`InterruptionMetrics`] is the aggregate the scheduler keeps: counters and
//! running averages updated on every transition. [`PerformanceMonitor`] keeps
//! a bounded window of per-run records for the runner and summarizes them as
//! a [`PerformanceReport`].

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::OperationState;

/// Runs kept by a [`PerformanceMonitor`] created with `Default`.
pub const DEFAULT_PERFORMANCE_WINDOW: usize = 1000;

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

// ---------------------------------------------------------------------------
// InterruptionMetrics
// ---------------------------------------------------------------------------

/// Scheduler-wide counters and running averages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterruptionMetrics {
    /// Operations that started monitoring.
    pub operations_monitored: u64,
    pub signals_processed: u64,
    pub interruptions: u64,
    pub resumptions: u64,
    pub cancellations: u64,
    pub completions: u64,
    pub failures: u64,
    /// Mean time spent committing an interruption (grace period plus the
    /// pause callback), in milliseconds.
    pub average_interruption_ms: f64,
    /// Mean pause length, in milliseconds.
    pub average_resumption_ms: f64,
    /// Completions over finished operations.
    pub success_rate: f64,
    /// Interruptions per monitored operation.
    pub interruption_rate: f64,
}

impl InterruptionMetrics {
    pub fn record_monitoring_started(&mut self) {
        self.operations_monitored += 1;
        self.refresh_rates();
    }

    pub fn record_signal(&mut self) {
        self.signals_processed += 1;
    }

    pub fn record_interruption(&mut self, elapsed: Duration) {
        self.interruptions += 1;
        self.average_interruption_ms +=
            (millis(elapsed) - self.average_interruption_ms) / self.interruptions as f64;
        self.refresh_rates();
    }

    pub fn record_resumption(&mut self, paused_for: Duration) {
        self.resumptions += 1;
        self.average_resumption_ms +=
            (millis(paused_for) - self.average_resumption_ms) / self.resumptions as f64;
    }

    pub fn record_cancellation(&mut self) {
        self.cancellations += 1;
        self.refresh_rates();
    }

    pub fn record_completion(&mut self) {
        self.completions += 1;
        self.refresh_rates();
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
        self.refresh_rates();
    }

    fn refresh_rates(&mut self) {
        let finished = self.completions + self.failures + self.cancellations;
        self.success_rate = ratio(self.completions, finished);
        self.interruption_rate = ratio(self.interruptions, self.operations_monitored);
    }
}

// ---------------------------------------------------------------------------
// PerformanceMonitor
// ---------------------------------------------------------------------------

/// Outcome of one runner invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub was_interrupted: bool,
    pub execution_time: Duration,
    /// Time spent paused or backing off instead of executing.
    pub interruption_overhead: Duration,
    pub success: bool,
    pub final_state: Option<OperationState>,
}

/// Summary over the monitor's current window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub runs: usize,
    pub success_rate: f64,
    pub interruption_rate: f64,
    pub mean_execution_ms: f64,
    pub mean_interruption_overhead_ms: f64,
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    records: VecDeque<RunRecord>,
    capacity: usize,
}

impl PerformanceMonitor {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(DEFAULT_PERFORMANCE_WINDOW)),
            capacity,
        }
    }

    pub fn record(&mut self, record: RunRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn report(&self) -> PerformanceReport {
        let runs = self.records.len();
        if runs == 0 {
            return PerformanceReport::default();
        }
        let successes = self.records.iter().filter(|r| r.success).count() as u64;
        let interrupted = self.records.iter().filter(|r| r.was_interrupted).count() as u64;
        let execution: Duration = self.records.iter().map(|r| r.execution_time).sum();
        let overhead: Duration = self.records.iter().map(|r| r.interruption_overhead).sum();
        PerformanceReport {
            runs,
            success_rate: ratio(successes, runs as u64),
            interruption_rate: ratio(interrupted, runs as u64),
            mean_execution_ms: millis(execution) / runs as f64,
            mean_interruption_overhead_ms: millis(overhead) / runs as f64,
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_PERFORMANCE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default() {
        let metrics = InterruptionMetrics::default();
        assert_eq!(metrics.interruptions, 0);
        assert_eq!(metrics.success_rate, 0.0);
        assert_eq!(metrics.interruption_rate, 0.0);
    }

    #[test]
    fn test_running_averages() {
        let mut metrics = InterruptionMetrics::default();
        metrics.record_interruption(Duration::from_millis(100));
        metrics.record_interruption(Duration::from_millis(300));
        assert!((metrics.average_interruption_ms - 200.0).abs() < 1e-9);

        metrics.record_resumption(Duration::from_millis(1000));
        metrics.record_resumption(Duration::from_millis(2000));
        metrics.record_resumption(Duration::from_millis(3000));
        assert!((metrics.average_resumption_ms - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_rates() {
        let mut metrics = InterruptionMetrics::default();
        for _ in 0..4 {
            metrics.record_monitoring_started();
        }
        metrics.record_interruption(Duration::ZERO);
        metrics.record_interruption(Duration::ZERO);
        metrics.record_completion();
        metrics.record_completion();
        metrics.record_completion();
        metrics.record_cancellation();
        assert!((metrics.interruption_rate - 0.5).abs() < f64::EPSILON);
        assert!((metrics.success_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_serialization() {
        let mut metrics = InterruptionMetrics::default();
        metrics.record_monitoring_started();
        metrics.record_failure();
        let json = serde_json::to_string(&metrics).expect("serialization failed");
        assert!(json.contains("\"failures\":1"));
        let parsed: InterruptionMetrics = serde_json::from_str(&json).expect("deserialization failed");
        assert_eq!(parsed, metrics);
    }

    #[test]
    fn test_performance_report() {
        let mut monitor = PerformanceMonitor::new(10);
        assert_eq!(monitor.report(), PerformanceReport::default());

        monitor.record(RunRecord {
            was_interrupted: true,
            execution_time: Duration::from_millis(300),
            interruption_overhead: Duration::from_millis(100),
            success: true,
            final_state: Some(OperationState::Completed),
        });
        monitor.record(RunRecord {
            was_interrupted: false,
            execution_time: Duration::from_millis(100),
            interruption_overhead: Duration::ZERO,
            success: false,
            final_state: Some(OperationState::Failed),
        });
        let report = monitor.report();
        assert_eq!(report.runs, 2);
        assert!((report.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((report.interruption_rate - 0.5).abs() < f64::EPSILON);
        assert!((report.mean_execution_ms - 200.0).abs() < 1e-9);
        assert!((report.mean_interruption_overhead_ms - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_performance_window_is_bounded() {
        let mut monitor = PerformanceMonitor::new(3);
        for i in 0..5 {
            monitor.record(RunRecord {
                was_interrupted: false,
                execution_time: Duration::from_millis(i),
                interruption_overhead: Duration::ZERO,
                success: true,
                final_state: None,
            });
        }
        assert_eq!(monitor.len(), 3);
        assert!((monitor.report().mean_execution_ms - 3.0).abs() < 1e-9);
    }
}
