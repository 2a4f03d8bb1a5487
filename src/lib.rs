// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Voice-activity driven interruption scheduling for long-running operations.
//!
//! A conversational agent often starts work that takes a while (a search, a
//! tool call) and the user keeps talking. This crate decides, signal by
//! signal, whether such an operation should be paused because the user
//! started speaking, resumed because they stopped, or cancelled, while
//! checkpointing partial progress and bounding how often any one operation
//! can be interrupted.
//!
//! The main pieces:
//!
//! * [`signals`]: voice-activity signals and the classifier that turns them
//!   into interrupt or resume decisions.
//! * [`lifecycle`]: operation states, priority tiers and the manager that owns
//!   every operation context.
//! * [`scheduler`]: the coordinator that applies decisions, invokes callbacks
//!   and runs periodic maintenance.
//! * [`runner`]: retry, backoff and checkpointing around a caller-supplied
//!   executor.
//! * [`observers`]: scheduler events and listener registration.

pub mod checkpoint;
pub mod config;
pub mod lifecycle;
pub mod metrics;
pub mod observers;
pub mod prelude;
pub mod runner;
pub mod scheduler;
pub mod signals;
pub mod utils;
