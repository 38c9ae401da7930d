//! Scriptable [`Step`] that counts its calls.

use async_trait::async_trait;
use futures::future::BoxFuture;
use hodei_steps_core::{Canceller, Step, StepError, StepResult};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

type Behavior = Arc<dyn Fn(Canceller) -> BoxFuture<'static, StepResult> + Send + Sync>;

/// A step whose `perform` runs a caller-supplied behaviour.
///
/// The behaviour receives the step's own [`Canceller`], which `cancel`
/// fires, so it can model steps that block until cancelled.
pub struct FakeStep {
    behavior: Behavior,
    canceller: Canceller,
    perform_count: AtomicUsize,
    cancel_count: AtomicUsize,
    performing: watch::Sender<usize>,
}

impl FakeStep {
    pub fn new<F, Fut>(behavior: F) -> Self
    where
        F: Fn(Canceller) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self {
            behavior: Arc::new(move |canceller| Box::pin(behavior(canceller))),
            canceller: Canceller::new(),
            perform_count: AtomicUsize::new(0),
            cancel_count: AtomicUsize::new(0),
            performing: watch::channel(0).0,
        }
    }

    /// Completes immediately with the result produced by `result`.
    pub fn returning<F>(result: F) -> Self
    where
        F: Fn() -> StepResult + Send + Sync + 'static,
    {
        let result = Arc::new(result);
        Self::new(move |_| {
            let result = result.clone();
            async move { result() }
        })
    }

    pub fn succeeding() -> Self {
        Self::returning(|| Ok(()))
    }

    pub fn failing(message: &'static str) -> Self {
        Self::returning(move || Err(StepError::other(message)))
    }

    /// Blocks until cancelled, then reports [`StepError::Cancelled`].
    pub fn blocking() -> Self {
        Self::blocking_then(|| Err(StepError::Cancelled))
    }

    /// Blocks until cancelled, then completes with `result`.
    pub fn blocking_then<F>(result: F) -> Self
    where
        F: Fn() -> StepResult + Send + Sync + 'static,
    {
        let result = Arc::new(result);
        Self::new(move |canceller| {
            let result = result.clone();
            async move {
                canceller.cancelled().await;
                result()
            }
        })
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn perform_count(&self) -> usize {
        self.perform_count.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_count.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.canceller.is_cancelled()
    }

    /// Wait until `perform` has been entered at least `count` times.
    pub async fn wait_for_performs(&self, count: usize) {
        let mut rx = self.performing.subscribe();
        let _ = rx.wait_for(|performed| *performed >= count).await;
    }
}

#[async_trait]
impl Step for FakeStep {
    async fn perform(&self) -> StepResult {
        let performed = self.perform_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.performing.send_replace(performed);
        (self.behavior)(self.canceller.clone()).await
    }

    fn cancel(&self) {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        self.canceller.cancel();
    }
}
