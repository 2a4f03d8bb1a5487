// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Scheduler events and the publish/subscribe plumbing around them.
//!
//! The scheduler publishes a [`SchedulerEvent`] on an [`EventBus`] for every
//! lifecycle change and every processed signal. Consumers either register a
//! listener closure or attach an [`Observer`].

pub mod base_observer;
pub mod event_bus;
pub mod events;

pub use base_observer::{LoggingObserver, Observer};
pub use event_bus::{EventBus, EventListener, ListenerId};
pub use events::{SchedulerEvent, EVENT_NAMES};
