// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Shared helpers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Generate a unique operation id of the form `<prefix>-<unix millis>-<n>`.
///
/// The counter makes ids unique within the process even when two are
/// generated in the same millisecond.
pub fn generate_unique_id(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let millis = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{}-{}-{}", prefix, millis, count)
}

/// Clamp a progress fraction into `[0, 1]`. Non-finite values yield `None`.
pub fn clamp_progress(progress: f64) -> Option<f64> {
    progress.is_finite().then(|| progress.clamp(0.0, 1.0))
}
