// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! End-to-end runs through `OperationRunner` with scripted executors.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use interrupt_scheduler::config::SchedulerConfig;
use interrupt_scheduler::lifecycle::{OperationState, Priority};
use interrupt_scheduler::runner::{
    ExecutionRequest, ExecutorError, OperationExecutor, OperationRequest, OperationRunner,
    RetryPolicy, RunnerConfig,
};
use interrupt_scheduler::scheduler::{InterruptionScheduler, SignalAction};
use interrupt_scheduler::signals::VoiceSignal;

/// Works through `steps` units of `step` each, honouring pauses between them.
struct Stepper {
    steps: u32,
    step: Duration,
}

#[async_trait]
impl OperationExecutor for Stepper {
    async fn execute(&self, request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError> {
        let control = &request.control;
        for i in 0..self.steps {
            control.wait_while_paused().await?;
            tokio::time::sleep(self.step).await;
            control.report_progress(f64::from(i + 1) / f64::from(self.steps));
            control.report_partial_results(json!({ "completed": i + 1 }));
        }
        Ok(json!({ "steps": self.steps }))
    }
}

/// Fails the first `failures` attempts.
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl OperationExecutor for Flaky {
    async fn execute(&self, request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ExecutorError::failed(format!("attempt {} failed", request.attempt)));
        }
        Ok(json!({ "attempt": request.attempt }))
    }
}

/// Never finishes on its own.
struct Stuck;

#[async_trait]
impl OperationExecutor for Stuck {
    async fn execute(&self, _request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError> {
        std::future::pending().await
    }
}

/// Reports half progress, fails once after a short wait, then reports the
/// checkpoint it was resumed from.
struct FailsAfterPause;

#[async_trait]
impl OperationExecutor for FailsAfterPause {
    async fn execute(&self, request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError> {
        if request.attempt == 0 {
            request.control.report_progress(0.5);
            tokio::time::sleep(Duration::from_millis(100)).await;
            request.control.wait_while_paused().await?;
            return Err(ExecutorError::failed("connection reset"));
        }
        let resumed = request.resumed_from.as_ref().and_then(|c| c.progress);
        Ok(json!({ "resumed_progress": resumed }))
    }
}

fn runner_with(
    scheduler: &InterruptionScheduler,
    operation_type: &str,
    executor: Arc<dyn OperationExecutor>,
    config: RunnerConfig,
) -> Arc<OperationRunner> {
    Arc::new(
        OperationRunner::builder(scheduler.clone())
            .executor(operation_type, executor)
            .config(config)
            .build()
            .expect("runner build failed"),
    )
}

fn stepper() -> Arc<dyn OperationExecutor> {
    Arc::new(Stepper {
        steps: 10,
        step: Duration::from_millis(100),
    })
}

#[tokio::test(start_paused = true)]
async fn test_flaky_executor_backs_off() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let config = RunnerConfig {
        retry: RetryPolicy {
            max_retries: 3,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 150,
        },
        ..Default::default()
    };
    let executor = Arc::new(Flaky {
        failures: 2,
        calls: AtomicU32::new(0),
    });
    let runner = runner_with(&scheduler, "lookup", executor, config);

    let result = runner
        .run(OperationRequest::new("lookup", json!({})).with_id("op"))
        .await;

    assert!(result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.data, Some(json!({ "attempt": 2 })));
    assert_eq!(
        result.retry_delays,
        vec![Duration::from_millis(100), Duration::from_millis(150)]
    );
    assert_eq!(result.interruption.final_state, Some(OperationState::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_pause_checkpoints_progress() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let runner = runner_with(&scheduler, "search", stepper(), RunnerConfig::default());

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run(OperationRequest::new("search", json!({"q": "flights"})).with_id("op"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(scheduler.force_interrupt("op", "manual").await.unwrap());

    {
        let checkpoints = scheduler.checkpoints();
        let store = checkpoints.lock().await;
        let checkpoint = store.get("op").expect("no checkpoint saved on pause");
        assert_eq!(checkpoint.parameters, json!({"q": "flights"}));
        assert!((checkpoint.progress.unwrap() - 0.3).abs() < 1e-9);
        assert_eq!(checkpoint.partial_results, Some(json!({ "completed": 3 })));
    }
    let status = scheduler.get_status("op").await.unwrap();
    assert_eq!(status.state, OperationState::Paused);
    assert!((status.execution_progress.unwrap() - 0.3).abs() < 1e-9);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert!(scheduler.force_resume("op", "manual").await.unwrap());

    let result = run.await.unwrap();
    assert!(result.success);
    assert!(result.interruption.was_interrupted);
    assert_eq!(result.interruption.interruption_count, 1);
    assert_eq!(
        result.interruption.total_interruption_time,
        Duration::from_millis(1_000)
    );
    assert!(!scheduler.checkpoints().lock().await.contains("op"));

    let report = runner.performance_report().await;
    assert_eq!(report.runs, 1);
    assert_eq!(report.interruption_rate, 1.0);
    assert!(report.mean_interruption_overhead_ms >= 1_000.0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_resumes_from_checkpoint() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let runner = runner_with(
        &scheduler,
        "upload",
        Arc::new(FailsAfterPause),
        RunnerConfig::default(),
    );

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run(OperationRequest::new("upload", json!({})).with_id("op"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler.force_interrupt("op", "manual").await.unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler.force_resume("op", "manual").await.unwrap());

    let result = run.await.unwrap();
    assert!(result.success);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.data, Some(json!({ "resumed_progress": 0.5 })));
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_persistence_can_be_disabled() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let runner = runner_with(&scheduler, "search", stepper(), RunnerConfig::default());

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run(
                    OperationRequest::new("search", json!({}))
                        .with_id("op")
                        .persist_checkpoint(false),
                )
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(scheduler.force_interrupt("op", "manual").await.unwrap());
    assert!(scheduler.checkpoints().lock().await.is_empty());

    assert!(scheduler.force_resume("op", "manual").await.unwrap());
    assert!(run.await.unwrap().success);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_run() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let runner = runner_with(&scheduler, "stuck", Arc::new(Stuck), RunnerConfig::default());

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run(OperationRequest::new("stuck", json!({})).with_id("op"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler.cancel_tool_call("op", "user changed topic").await.unwrap());

    let result = run.await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("operation cancelled"));
    assert_eq!(result.attempts, 1);
    assert_eq!(result.interruption.final_state, Some(OperationState::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_paused_drops_checkpoint() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let runner = runner_with(&scheduler, "search", stepper(), RunnerConfig::default());

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run(OperationRequest::new("search", json!({})).with_id("op"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(scheduler.force_interrupt("op", "manual").await.unwrap());
    assert!(scheduler.checkpoints().lock().await.contains("op"));

    assert!(scheduler.cancel_tool_call("op", "user changed topic").await.unwrap());
    assert!(!scheduler.checkpoints().lock().await.contains("op"));

    let result = run.await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("operation cancelled"));
    assert_eq!(result.interruption.final_state, Some(OperationState::Cancelled));
    assert!(!scheduler.checkpoints().lock().await.contains("op"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_cuts_backoff_short() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let config = RunnerConfig {
        retry: RetryPolicy {
            max_retries: 3,
            base_delay_ms: 20_000,
            multiplier: 2.0,
            max_delay_ms: 20_000,
        },
        ..Default::default()
    };
    let executor = Arc::new(Flaky {
        failures: 5,
        calls: AtomicU32::new(0),
    });
    let runner = runner_with(&scheduler, "lookup", executor, config);

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run(OperationRequest::new("lookup", json!({})).with_id("op"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(scheduler.cancel_tool_call("op", "user changed topic").await.unwrap());

    let result = run.await.unwrap();
    assert!(!result.success);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.error.as_deref(), Some("operation cancelled"));
    assert!(result.execution_time < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_aborts_stuck_executor() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let runner = runner_with(&scheduler, "stuck", Arc::new(Stuck), RunnerConfig::default());

    let result = runner
        .run(
            OperationRequest::new("stuck", json!({}))
                .with_id("op")
                .with_priority(Priority::Low),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Timeout exceeded"));
    assert_eq!(result.interruption.final_state, Some(OperationState::Failed));
    assert!(result.execution_time >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_voice_signals_pause_and_resume_executor() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let config = RunnerConfig {
        default_priority: Priority::Low,
        ..Default::default()
    };
    let runner = runner_with(&scheduler, "search", stepper(), config);

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run(OperationRequest::new("search", json!({})).with_id("op"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(250)).await;
    let outcome = scheduler
        .process_signal("op", VoiceSignal::voice_start(0, 0.9))
        .await
        .unwrap();
    assert_eq!(outcome.action, SignalAction::Interrupted);

    let outcome = scheduler
        .process_signal("op", VoiceSignal::silence(2_000, 0.9).with_duration(1_600))
        .await
        .unwrap();
    assert_eq!(outcome.action, SignalAction::Resumed);

    let result = run.await.unwrap();
    assert!(result.success);
    assert_eq!(result.interruption.interruption_count, 1);
    assert_eq!(result.interruption.signal_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_performance_report_mixes_outcomes() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let config = RunnerConfig {
        retry: RetryPolicy {
            max_retries: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let executor = Arc::new(Flaky {
        failures: 1,
        calls: AtomicU32::new(0),
    });
    let runner = runner_with(&scheduler, "lookup", executor, config);

    let failed = runner.run(OperationRequest::new("lookup", json!({}))).await;
    let succeeded = runner.run(OperationRequest::new("lookup", json!({}))).await;
    assert!(!failed.success);
    assert_eq!(failed.error.as_deref(), Some("attempt 0 failed"));
    assert!(succeeded.success);

    let report = runner.performance_report().await;
    assert_eq!(report.runs, 2);
    assert_eq!(report.success_rate, 0.5);
    assert_eq!(report.interruption_rate, 0.0);
}
