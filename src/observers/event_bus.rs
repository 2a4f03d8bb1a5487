// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Listener registry and dispatch for [`SchedulerEvent`]s.
//!
//! Listeners subscribe either to one event name or to every event. Each
//! listener is *inline* (its future is awaited by the emitter, in
//! registration order) or *background* (spawned as a Tokio task and tracked
//! so [`EventBus::cleanup`] can wait for it).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::base_observer::Observer;
use super::events::{SchedulerEvent, EVENT_NAMES};

/// An event listener. Capture whatever state it needs via `Arc`/`Clone`.
pub type EventListener = Arc<dyn Fn(SchedulerEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle returned on registration, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerEntry {
    id: ListenerId,
    /// `None` subscribes to every event.
    event_name: Option<&'static str>,
    listener: EventListener,
    inline: bool,
}

pub struct EventBus {
    listeners: RwLock<Vec<ListenerEntry>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Subscribe `listener` to `event_name`, awaited inline.
    ///
    /// Unknown event names are logged and rejected.
    pub async fn on(&self, event_name: &str, listener: EventListener) -> Option<ListenerId> {
        self.add(event_name, listener, true).await
    }

    /// Subscribe `listener` to `event_name`, run as a background task.
    pub async fn on_background(&self, event_name: &str, listener: EventListener) -> Option<ListenerId> {
        self.add(event_name, listener, false).await
    }

    /// Subscribe `listener` to every event, awaited inline.
    pub async fn on_any(&self, listener: EventListener) -> ListenerId {
        self.push(None, listener, true).await
    }

    /// Forward every event to `observer`.
    pub async fn add_observer(&self, observer: Arc<dyn Observer>) -> ListenerId {
        let listener: EventListener = Arc::new(move |event| {
            let observer = observer.clone();
            Box::pin(async move { observer.on_event(&event).await })
        });
        self.on_any(listener).await
    }

    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Deliver `event` to every matching listener.
    pub async fn emit(&self, event: SchedulerEvent) {
        let name = event.name();
        let targets: Vec<(EventListener, bool)> = {
            let listeners = self.listeners.read().await;
            listeners
                .iter()
                .filter(|entry| entry.event_name.map_or(true, |n| n == name))
                .map(|entry| (entry.listener.clone(), entry.inline))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        for (listener, inline) in targets {
            if inline {
                (listener)(event.clone()).await;
            } else {
                let handle = tokio::spawn((listener)(event.clone()));
                self.tasks.lock().await.push((name, handle));
            }
        }

        self.tasks.lock().await.retain(|(_, handle)| !handle.is_finished());
    }

    /// Wait for background listeners that are still running.
    pub async fn cleanup(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        if tasks.is_empty() {
            return;
        }
        let names: Vec<&str> = tasks.iter().map(|(n, _)| *n).collect();
        tracing::debug!("EventBus: waiting on listeners to finish {:?}", names);
        for (_, handle) in tasks {
            let _ = handle.await;
        }
    }

    /// Detach every listener.
    pub async fn clear(&self) {
        self.listeners.write().await.clear();
    }

    async fn add(&self, event_name: &str, listener: EventListener, inline: bool) -> Option<ListenerId> {
        let Some(known) = EVENT_NAMES.iter().copied().find(|n| *n == event_name) else {
            tracing::warn!("EventBus: unknown event {}", event_name);
            return None;
        };
        Some(self.push(Some(known), listener, inline).await)
    }

    async fn push(
        &self,
        event_name: Option<&'static str>,
        listener: EventListener,
        inline: bool,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().await.push(ListenerEntry {
            id,
            event_name,
            listener,
            inline,
        });
        id
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}
