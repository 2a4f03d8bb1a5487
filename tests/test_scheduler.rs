// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Scheduler behaviour driven through the public API.
//!
//! Every test runs on a paused Tokio clock so grace periods, resume delays and
//! the maintenance timer advance deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;

use interrupt_scheduler::config::SchedulerConfig;
use interrupt_scheduler::lifecycle::{OperationState, Priority};
use interrupt_scheduler::observers::{EventListener, SchedulerEvent};
use interrupt_scheduler::scheduler::{InterruptionScheduler, OperationCallbacks, SignalAction};
use interrupt_scheduler::signals::VoiceSignal;

async fn monitored(scheduler: &InterruptionScheduler, id: &str, priority: Priority) {
    scheduler
        .start_monitoring(id, "web_search", json!({"query": "rust"}), priority, OperationCallbacks::new())
        .await
        .expect("start_monitoring failed");
}

async fn record_events(scheduler: &InterruptionScheduler) -> Arc<Mutex<Vec<&'static str>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: EventListener = Arc::new(move |event: SchedulerEvent| {
        let sink = sink.clone();
        Box::pin(async move {
            sink.lock().await.push(event.name());
        })
    });
    scheduler.events().on_any(listener).await;
    seen
}

#[tokio::test(start_paused = true)]
async fn test_voice_start_interrupts_low_priority() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    monitored(&scheduler, "op", Priority::Low).await;

    let outcome = scheduler
        .process_signal("op", VoiceSignal::voice_start(0, 0.85))
        .await
        .unwrap();

    assert!(outcome.decision.should_interrupt);
    assert_eq!(outcome.action, SignalAction::Interrupted);
    let status = scheduler.get_status("op").await.unwrap();
    assert_eq!(status.state, OperationState::Paused);
    assert_eq!(status.reason.as_deref(), Some("Voice activity detected"));
    assert!(status.interrupted_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_silence_resumes_paused_operation() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    monitored(&scheduler, "op", Priority::Low).await;
    scheduler
        .process_signal("op", VoiceSignal::voice_start(0, 0.85))
        .await
        .unwrap();

    let outcome = scheduler
        .process_signal("op", VoiceSignal::voice_end(300, 0.9))
        .await
        .unwrap();
    assert_eq!(outcome.action, SignalAction::None);

    let outcome = scheduler
        .process_signal("op", VoiceSignal::silence(1800, 0.95))
        .await
        .unwrap();
    assert!(outcome.decision.should_resume);
    assert_eq!(outcome.action, SignalAction::Resumed);

    let status = scheduler.get_status("op").await.unwrap();
    assert_eq!(status.state, OperationState::Resumed);
    assert!(status.total_interruption_time > Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_high_priority_is_not_interrupted() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    monitored(&scheduler, "op", Priority::High).await;

    let outcome = scheduler
        .process_signal("op", VoiceSignal::voice_start(0, 0.85))
        .await
        .unwrap();
    assert!(outcome.decision.should_interrupt);
    assert_eq!(outcome.action, SignalAction::NotEligible);
    assert!(!scheduler.can_interrupt("op").await);
    assert_eq!(
        scheduler.get_status("op").await.unwrap().state,
        OperationState::Running
    );
}

#[tokio::test(start_paused = true)]
async fn test_idle_operation_times_out() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let seen = record_events(&scheduler).await;
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let callbacks = OperationCallbacks::new().on_error(move |_ctx, error| {
        let sink = sink.clone();
        async move {
            sink.lock().await.push(error);
        }
    });
    scheduler
        .start_monitoring("op", "web_search", json!({}), Priority::Low, callbacks)
        .await
        .unwrap();

    // Low priority times out after 30s; the sweep runs every 5s.
    tokio::time::sleep(Duration::from_secs(36)).await;

    let status = scheduler.get_status("op").await.unwrap();
    assert_eq!(status.state, OperationState::Failed);
    assert_eq!(status.reason.as_deref(), Some("Timeout exceeded"));
    assert!(!scheduler.is_monitoring("op").await);
    assert_eq!(errors.lock().await.as_slice(), ["Timeout exceeded".to_string()]);
    assert!(seen.lock().await.contains(&"tool_call_failed"));
}

#[tokio::test(start_paused = true)]
async fn test_critical_priority_never_leaves_running() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    monitored(&scheduler, "op", Priority::Critical).await;

    let signals = [
        VoiceSignal::voice_start(0, 1.0),
        VoiceSignal::voice_continuous(2_000, 1.0),
        VoiceSignal::voice_continuous(5_000, 1.0),
        VoiceSignal::voice_end(5_500, 1.0),
        VoiceSignal::silence(9_000, 1.0),
        VoiceSignal::noise(9_500, 1.0, 1.0),
        VoiceSignal::voice_start(10_000, 1.0),
    ];
    for signal in signals {
        scheduler.process_signal("op", signal).await.unwrap();
        assert_eq!(
            scheduler.get_status("op").await.unwrap().state,
            OperationState::Running
        );
    }
    assert!(!scheduler.force_interrupt("op", "manual").await.unwrap());
    assert_eq!(scheduler.get_status("op").await.unwrap().state, OperationState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_max_interruptions_exhausts_budget() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    monitored(&scheduler, "op", Priority::Low).await;
    let max = scheduler.config().await.interruption.max_interruptions;

    for _ in 0..max {
        assert!(scheduler.force_interrupt("op", "manual").await.unwrap());
        assert!(scheduler.force_resume("op", "manual").await.unwrap());
    }

    assert!(!scheduler.can_interrupt("op").await);
    assert_eq!(scheduler.get_status("op").await.unwrap().retry_count, max);
    assert!(!scheduler.force_interrupt("op", "manual").await.unwrap());
    assert_eq!(scheduler.get_metrics().await.interruptions, u64::from(max));
}

#[tokio::test(start_paused = true)]
async fn test_second_cancel_is_noop() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let cancels = Arc::new(AtomicUsize::new(0));
    let counter = cancels.clone();
    let callbacks = OperationCallbacks::new().on_cancel(move |_ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    scheduler
        .start_monitoring("op", "web_search", json!({}), Priority::Critical, callbacks)
        .await
        .unwrap();

    assert!(scheduler.cancel_tool_call("op", "user").await.unwrap());
    assert!(!scheduler.cancel_tool_call("op", "user").await.unwrap());
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert_eq!(
        scheduler.get_status("op").await.unwrap().state,
        OperationState::Cancelled
    );
}

#[tokio::test(start_paused = true)]
async fn test_total_interruption_time_is_exact() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    monitored(&scheduler, "op", Priority::Medium).await;

    assert!(scheduler.force_interrupt("op", "manual").await.unwrap());
    tokio::time::advance(Duration::from_millis(1_234)).await;
    assert!(scheduler.force_resume("op", "manual").await.unwrap());
    let context = scheduler.stop_monitoring("op", Ok(json!("done"))).await.unwrap();

    let paused = context.resumed_at.unwrap() - context.interrupted_at.unwrap();
    assert_eq!(context.state, OperationState::Completed);
    assert_eq!(context.total_interruption_time, paused);
    assert_eq!(paused, Duration::from_millis(1_234));
}

#[tokio::test(start_paused = true)]
async fn test_continuous_voice_interrupts_after_timeout() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    monitored(&scheduler, "op", Priority::Low).await;

    // Below the voice threshold, so only the continuous-voice rule can fire.
    scheduler
        .process_signal("op", VoiceSignal::voice_start(0, 0.5))
        .await
        .unwrap();
    let outcome = scheduler
        .process_signal("op", VoiceSignal::voice_continuous(2_000, 0.5))
        .await
        .unwrap();
    assert_eq!(outcome.action, SignalAction::None);
    let outcome = scheduler
        .process_signal("op", VoiceSignal::voice_continuous(3_500, 0.5))
        .await
        .unwrap();
    assert_eq!(outcome.action, SignalAction::Interrupted);
    assert!((outcome.decision.confidence - 0.9).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_reaches_every_operation() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    monitored(&scheduler, "low", Priority::Low).await;
    monitored(&scheduler, "medium", Priority::Medium).await;
    monitored(&scheduler, "high", Priority::High).await;

    let mut outcomes = scheduler
        .process_signal_all(VoiceSignal::voice_start(0, 0.9))
        .await;
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    let actions: Vec<(&str, SignalAction)> = outcomes
        .iter()
        .map(|(id, outcome)| (id.as_str(), outcome.as_ref().unwrap().action))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("high", SignalAction::NotEligible),
            ("low", SignalAction::Interrupted),
            ("medium", SignalAction::Interrupted),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_event_sequence() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let seen = record_events(&scheduler).await;
    monitored(&scheduler, "op", Priority::Low).await;

    scheduler
        .process_signal("op", VoiceSignal::voice_start(0, 0.9))
        .await
        .unwrap();
    scheduler
        .process_signal("op", VoiceSignal::silence(100, 0.9).with_duration(2_000))
        .await
        .unwrap();
    scheduler.stop_monitoring("op", Ok(json!(null))).await.unwrap();

    assert_eq!(
        seen.lock().await.as_slice(),
        [
            "monitoring_started",
            "signal_processed",
            "tool_call_interrupted",
            "signal_processed",
            "tool_call_resumed",
            "monitoring_stopped",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_progress_provider_marks_interruption() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let callbacks = OperationCallbacks::new().progress(|| Some(0.42));
    scheduler
        .start_monitoring("op", "web_search", json!({}), Priority::Low, callbacks)
        .await
        .unwrap();

    scheduler.force_interrupt("op", "manual").await.unwrap();
    assert_eq!(
        scheduler.get_status("op").await.unwrap().execution_progress,
        Some(0.42)
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_stop_keeps_history() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    monitored(&scheduler, "op", Priority::Low).await;
    let context = scheduler
        .stop_monitoring("op", Err("backend unavailable".to_string()))
        .await
        .unwrap();
    assert_eq!(context.state, OperationState::Failed);
    assert_eq!(context.reason.as_deref(), Some("backend unavailable"));

    // The id can be monitored again once the previous run is archived.
    monitored(&scheduler, "op", Priority::Low).await;
    assert_eq!(scheduler.get_history("op").await.len(), 1);
    assert_eq!(scheduler.get_active_operations().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silence_during_grace_period_keeps_running() {
    let mut config = SchedulerConfig::default();
    config.interruption.grace_period_ms = 1_000;
    let scheduler = InterruptionScheduler::new(config).unwrap();
    monitored(&scheduler, "op", Priority::Low).await;

    let pending = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler
                .process_signal("op", VoiceSignal::voice_start(0, 0.9))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = scheduler
        .process_signal("op", VoiceSignal::voice_end(100, 0.9).with_duration(2_000))
        .await
        .unwrap();
    assert!(outcome.decision.should_resume);
    assert_eq!(outcome.action, SignalAction::NotEligible);

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome.action, SignalAction::Superseded);
    let status = scheduler.get_status("op").await.unwrap();
    assert_eq!(status.state, OperationState::Running);
    assert_eq!(status.retry_count, 0);
    assert_eq!(scheduler.get_metrics().await.interruptions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_voice_during_resume_delay_stays_paused() {
    let mut config = SchedulerConfig::default();
    config.interruption.resume_delay_ms = 1_000;
    let scheduler = InterruptionScheduler::new(config).unwrap();
    monitored(&scheduler, "op", Priority::Low).await;
    assert!(scheduler.force_interrupt("op", "manual").await.unwrap());

    let pending = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler
                .process_signal("op", VoiceSignal::silence(2_000, 0.9).with_duration(1_600))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = scheduler
        .process_signal("op", VoiceSignal::voice_start(2_100, 0.9))
        .await
        .unwrap();
    assert!(outcome.decision.should_interrupt);
    assert_eq!(outcome.action, SignalAction::NotEligible);

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome.action, SignalAction::Superseded);
    assert_eq!(
        scheduler.get_status("op").await.unwrap().state,
        OperationState::Paused
    );

    // A later quiet spell still resumes.
    let outcome = scheduler
        .process_signal("op", VoiceSignal::silence(4_000, 0.9).with_duration(1_600))
        .await
        .unwrap();
    assert_eq!(outcome.action, SignalAction::Resumed);
}

#[tokio::test(start_paused = true)]
async fn test_listener_can_resume_same_operation() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    monitored(&scheduler, "op", Priority::Low).await;

    let handle = scheduler.clone();
    let listener: EventListener = Arc::new(move |event: SchedulerEvent| {
        let scheduler = handle.clone();
        Box::pin(async move {
            if let Some(id) = event.operation_id() {
                let _ = scheduler.force_resume(id, "listener").await;
            }
        })
    });
    scheduler
        .events()
        .on("tool_call_interrupted", listener)
        .await
        .expect("known event name");

    assert!(scheduler.force_interrupt("op", "manual").await.unwrap());
    let status = scheduler.get_status("op").await.unwrap();
    assert_eq!(status.state, OperationState::Resumed);
    assert_eq!(status.reason.as_deref(), Some("listener"));
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_non_finite_progress_is_ignored() {
    let scheduler = InterruptionScheduler::new(SchedulerConfig::default()).unwrap();
    let callbacks = OperationCallbacks::new().progress(|| Some(f64::NAN));
    scheduler
        .start_monitoring("op", "web_search", json!({}), Priority::Low, callbacks)
        .await
        .unwrap();

    assert!(scheduler.force_interrupt("op", "manual").await.unwrap());
    assert_eq!(
        scheduler.get_status("op").await.unwrap().execution_progress,
        None
    );
}
