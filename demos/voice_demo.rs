// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Scripted conversation: a slow search is paused when the user starts
//! talking and resumed once they go quiet.
//!
//! Usage: cargo run --example voice_demo
//! Set RUST_LOG=interrupt_scheduler=trace to see every classified signal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use interrupt_scheduler::prelude::*;

// ---------------------------------------------------------------------------
// Fake executor
// ---------------------------------------------------------------------------

/// Pretends to query a flight search backend page by page.
struct FlightSearch;

#[async_trait]
impl OperationExecutor for FlightSearch {
    async fn execute(&self, request: ExecutionRequest) -> Result<serde_json::Value, ExecutorError> {
        const PAGES: u32 = 8;
        let control = &request.control;
        let first = request
            .resumed_from
            .as_ref()
            .and_then(|c| c.progress)
            .map(|p| (p * f64::from(PAGES)).round() as u32)
            .unwrap_or(0);

        let mut fares = Vec::new();
        for page in first..PAGES {
            control.wait_while_paused().await?;
            tokio::time::sleep(Duration::from_millis(250)).await;
            fares.push(json!({ "page": page, "cheapest": 180 + page * 7 }));
            control.report_progress(f64::from(page + 1) / f64::from(PAGES));
            control.report_partial_results(json!(fares));
            tracing::info!("FlightSearch: fetched page {}/{}", page + 1, PAGES);
        }
        Ok(json!({ "route": request.parameters["route"], "fares": fares }))
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,interrupt_scheduler=debug".parse().unwrap()),
        )
        .init();

    let scheduler = InterruptionScheduler::new(SchedulerConfig::default())?;
    scheduler.events().add_observer(Arc::new(LoggingObserver)).await;

    let runner = Arc::new(
        OperationRunner::builder(scheduler.clone())
            .executor("flight_search", Arc::new(FlightSearch))
            .build()?,
    );

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .run(
                    OperationRequest::new("flight_search", json!({ "route": "SFO-JFK" }))
                        .with_id("search-1")
                        .with_priority(Priority::Low),
                )
                .await
        })
    };

    // Timestamps are on the VAD front-end's clock.
    let script = [
        (600, VoiceSignal::noise(600, 0.6, 0.2)),
        (300, VoiceSignal::voice_start(900, 0.88)),
        (400, VoiceSignal::voice_continuous(1_300, 0.9)),
        (500, VoiceSignal::voice_end(1_800, 0.85)),
        (900, VoiceSignal::silence(2_700, 0.95)),
        (200, VoiceSignal::silence(3_500, 0.97)),
    ];
    for (wait_ms, signal) in script {
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        let kind = signal.kind;
        match scheduler.process_signal("search-1", signal).await {
            Ok(outcome) => println!(
                "{:<18} -> {:?} ({})",
                kind, outcome.action, outcome.decision.reason
            ),
            Err(e) => println!("{:<18} -> error: {}", kind, e),
        }
    }

    let result = run.await?;
    println!("\nResult:\n{}", serde_json::to_string_pretty(&result)?);
    println!(
        "\nScheduler metrics:\n{}",
        serde_json::to_string_pretty(&scheduler.get_metrics().await)?
    );
    println!(
        "\nRunner report:\n{}",
        serde_json::to_string_pretty(&runner.performance_report().await)?
    );

    scheduler.shutdown().await;
    Ok(())
}
