// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-operation callbacks invoked by the scheduler.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::lifecycle::OperationContext;
use crate::utils::helpers::clamp_progress;

/// Error returned by a lifecycle callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Pause, resume, cancel and completion hooks. Each receives a snapshot of the
/// context taken just before (pause, resume, cancel) or just after
/// (completion) the transition.
pub type LifecycleCallback =
    Arc<dyn Fn(OperationContext) -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync>;

/// Receives the failed context and the error message.
pub type ErrorCallback = Arc<dyn Fn(OperationContext, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Reports how far the operation has progressed, in `[0, 1]`.
pub type ProgressProvider = Arc<dyn Fn() -> Option<f64> + Send + Sync>;

/// Callback set stored next to an operation's context.
///
/// Every hook is optional. Build with the chained setters:
///
/// ```rust
/// use interrupt_scheduler::scheduler::OperationCallbacks;
///
/// let callbacks = OperationCallbacks::new()
///     .on_pause(|ctx| async move {
///         println!("pausing {}", ctx.operation_id);
///         Ok(())
///     })
///     .progress(|| Some(0.5));
/// ```
#[derive(Clone, Default)]
pub struct OperationCallbacks {
    pub(crate) on_pause: Option<LifecycleCallback>,
    pub(crate) on_resume: Option<LifecycleCallback>,
    pub(crate) on_cancel: Option<LifecycleCallback>,
    pub(crate) on_complete: Option<LifecycleCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) progress: Option<ProgressProvider>,
}

fn lifecycle_callback<F, Fut>(f: F) -> LifecycleCallback
where
    F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

impl OperationCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_pause<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.on_pause = Some(lifecycle_callback(f));
        self
    }

    pub fn on_resume<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.on_resume = Some(lifecycle_callback(f));
        self
    }

    pub fn on_cancel<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.on_cancel = Some(lifecycle_callback(f));
        self
    }

    pub fn on_complete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        self.on_complete = Some(lifecycle_callback(f));
        self
    }

    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(OperationContext, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |ctx, error| Box::pin(f(ctx, error))));
        self
    }

    pub fn progress<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<f64> + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(f));
        self
    }

    pub(crate) fn current_progress(&self) -> Option<f64> {
        self.progress
            .as_ref()
            .and_then(|provider| provider())
            .and_then(clamp_progress)
    }
}

impl fmt::Debug for OperationCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationCallbacks")
            .field("on_pause", &self.on_pause.is_some())
            .field("on_resume", &self.on_resume.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}
