// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! In-memory checkpoints for paused operations.
//!
//! A checkpoint captures what an operation had done when it was paused so the
//! next attempt can pick up from there. Storage is best-effort: it is bounded
//! by entry count (oldest evicted first) and by age (TTL sweep), and nothing
//! survives a restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::CheckpointSettings;

/// Saved progress of one operation.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    pub operation_id: String,
    pub operation_name: String,
    pub parameters: serde_json::Value,
    pub partial_results: Option<serde_json::Value>,
    pub progress: Option<f64>,
    #[serde(skip)]
    pub timestamp: Instant,
}

impl Checkpoint {
    pub fn new(
        operation_id: impl Into<String>,
        operation_name: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            operation_name: operation_name.into(),
            parameters,
            partial_results: None,
            progress: None,
            timestamp: Instant::now(),
        }
    }

    pub fn with_partial_results(mut self, results: Option<serde_json::Value>) -> Self {
        self.partial_results = results;
        self
    }

    pub fn with_progress(mut self, progress: Option<f64>) -> Self {
        self.progress = progress.map(|p| p.clamp(0.0, 1.0));
        self
    }

    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Bounded checkpoint map keyed by operation id.
#[derive(Debug)]
pub struct CheckpointStore {
    entries: HashMap<String, Checkpoint>,
    max_entries: usize,
    ttl: Duration,
}

impl CheckpointStore {
    pub fn new(settings: &CheckpointSettings) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: settings.max_entries.max(1),
            ttl: settings.ttl(),
        }
    }

    /// Store `checkpoint`, replacing any previous one for the same id.
    ///
    /// When the store is full the oldest entry is evicted.
    pub fn save(&mut self, checkpoint: Checkpoint) {
        let id = checkpoint.operation_id.clone();
        if !self.entries.contains_key(&id) && self.entries.len() >= self.max_entries {
            if let Some(oldest) = self
                .entries
                .values()
                .min_by_key(|c| c.timestamp)
                .map(|c| c.operation_id.clone())
            {
                tracing::debug!("CheckpointStore: evicting oldest checkpoint {}", oldest);
                self.entries.remove(&oldest);
            }
        }
        tracing::trace!(
            operation_id = %id,
            progress = ?checkpoint.progress,
            "CheckpointStore: saved"
        );
        self.entries.insert(id, checkpoint);
    }

    pub fn get(&self, operation_id: &str) -> Option<&Checkpoint> {
        self.entries.get(operation_id)
    }

    pub fn contains(&self, operation_id: &str) -> bool {
        self.entries.contains_key(operation_id)
    }

    pub fn remove(&mut self, operation_id: &str) -> Option<Checkpoint> {
        self.entries.remove(operation_id)
    }

    /// Drop checkpoints older than the configured TTL.
    pub fn sweep_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, c| c.age() <= ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "CheckpointStore: expired checkpoints removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Store shared between the scheduler and the runner.
pub type SharedCheckpointStore = Arc<Mutex<CheckpointStore>>;

pub fn shared_store(settings: &CheckpointSettings) -> SharedCheckpointStore {
    Arc::new(Mutex::new(CheckpointStore::new(settings)))
}
