//! Execution contexts — the scope that owns every operation an automation or
//! scene starts.
//!
//! A context is *ambient*: while a future runs inside
//! [`ExecutionContext::run`], every [`Operation`] created on that task (and
//! on tasks started through [`ExecutionContext::spawn`]) attaches to it
//! without being handed the context explicitly. Disposing the context
//! cancels the commit/extend phases of everything attached; compensations
//! still run to completion, bounded only by [`ExecutionContext::shutdown`]'s
//! timeout.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio::task::futures::TaskLocalFuture;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use trellis_domain::error::ConcurrencyViolation;
use trellis_domain::id::ContextId;

use crate::operation::Operation;
use crate::ports::Scheduler;

tokio::task_local! {
    static AMBIENT: Option<ExecutionContext>;
}

/// Result of [`ExecutionContext::shutdown`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Every attached operation settled, compensations included.
    Complete,
    /// The timeout elapsed first; `pending` compensations were told to stop.
    TimedOut { pending: usize },
}

struct Inner {
    id: ContextId,
    name: String,
    scheduler: Arc<dyn Scheduler>,
    /// Disposal: cancels commit and extend of attached operations.
    cancel: CancellationToken,
    /// Teardown deadline: aborts compensations still running.
    teardown: CancellationToken,
    operations: Mutex<Vec<Operation>>,
    tasks: TaskTracker,
}

/// Handle to an execution scope. Cheap to clone; clones share the scope.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    #[must_use]
    pub fn new(name: impl Into<String>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ContextId::new(),
                name: name.into(),
                scheduler,
                cancel: CancellationToken::new(),
                teardown: CancellationToken::new(),
                operations: Mutex::new(Vec::new()),
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// The context ambient on the current task, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        AMBIENT.try_with(Clone::clone).ok().flatten()
    }

    /// Run `fut` with this context ambient.
    ///
    /// Re-entering the context that is already ambient is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`ConcurrencyViolation`] when a different context is ambient
    /// on the calling task. The check happens here, before `fut` is polled.
    pub fn run<F: Future>(
        &self,
        fut: F,
    ) -> Result<TaskLocalFuture<Option<Self>, F>, ConcurrencyViolation> {
        if let Some(active) = Self::current()
            && active.id() != self.id()
        {
            return Err(ConcurrencyViolation {
                active: active.id(),
                requested: self.id(),
            });
        }
        Ok(Self::scoped(Some(self.clone()), fut))
    }

    /// Run `fut` with no ambient context, even if one is ambient here.
    pub fn detached<F: Future>(fut: F) -> TaskLocalFuture<Option<Self>, F> {
        Self::scoped(None, fut)
    }

    pub(crate) fn scoped<F: Future>(
        context: Option<Self>,
        fut: F,
    ) -> TaskLocalFuture<Option<Self>, F> {
        AMBIENT.scope(context, fut)
    }

    /// Spawn `fut` on a new task with this context ambient. The task is
    /// dropped at its next suspension point once the context is disposed,
    /// in which case the handle yields `None`.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let token = self.inner.cancel.clone();
        let scoped = Self::scoped(Some(self.clone()), fut);
        self.inner.tasks.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => None,
                output = scoped => Some(output),
            }
        })
    }

    /// Invoke `tick` once per `period`, first after one period, until the
    /// context is disposed. Ticks are measured on the context's scheduler
    /// and do not drift when a tick takes time.
    pub fn every<F, Fut>(&self, period: Duration, mut tick: F) -> JoinHandle<Option<()>>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scheduler = Arc::clone(&self.inner.scheduler);
        let token = self.inner.cancel.clone();
        self.spawn(async move {
            let mut next = scheduler.now() + period;
            while !token.is_cancelled() {
                scheduler.sleep_until(next).await;
                tick().await;
                next += period;
            }
        })
    }

    /// Run `reaction` for every item of `updates` (typically
    /// [`Device::subscribe`](crate::registry::Device::subscribe)), one at a
    /// time, until the stream ends or the context is disposed.
    pub fn on_state<S, F, Fut>(&self, updates: S, mut reaction: F) -> JoinHandle<Option<()>>
    where
        S: Stream + Send + 'static,
        S::Item: Send,
        F: FnMut(S::Item) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            let mut updates = std::pin::pin!(updates);
            while let Some(update) = updates.next().await {
                reaction(update).await;
            }
        })
    }

    pub(crate) fn attach(&self, operation: Operation) {
        let mut operations = self
            .inner
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        operations.retain(|op| !op.is_settled());
        operations.push(operation);
    }

    fn attached(&self) -> Vec<Operation> {
        self.inner
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn unsettled(&self) -> Vec<Operation> {
        self.attached()
            .into_iter()
            .filter(|op| !op.is_settled())
            .collect()
    }

    /// Wait until the extend phase of every attached operation has settled,
    /// including operations attached while waiting.
    pub async fn drain(&self) {
        loop {
            let pending: Vec<_> = self
                .attached()
                .into_iter()
                .filter(|op| !op.is_extended())
                .collect();
            if pending.is_empty() {
                return;
            }
            join_all(pending.iter().map(Operation::extended)).await;
        }
    }

    /// Dispose the context: cancel the commit/extend phases of every
    /// attached operation and stop spawned tasks. Compensations keep running.
    pub fn cancel(&self) {
        if !self.inner.cancel.is_cancelled() {
            tracing::debug!(context = %self.inner.name, "disposing execution context");
        }
        self.inner.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Dispose the context and wait for every attached operation to settle
    /// fully. When `timeout` elapses first, compensations still running are
    /// cancelled and the teardown is reported as timed out.
    pub async fn shutdown(&self, timeout: Duration) -> Teardown {
        self.cancel();
        let deadline = self.inner.scheduler.now() + timeout;
        self.inner.tasks.close();

        // Compensations run with this context ambient and may attach
        // follow-up operations, so keep going until nothing is unsettled.
        let settled = async {
            loop {
                let pending = self.unsettled();
                if pending.is_empty() && self.inner.tasks.is_empty() {
                    return;
                }
                join_all(pending.iter().map(Operation::compensated)).await;
                self.inner.tasks.wait().await;
            }
        };

        tokio::select! {
            () = settled => {
                tracing::debug!(context = %self.inner.name, "execution context torn down");
                Teardown::Complete
            }
            () = self.inner.scheduler.sleep_until(deadline) => {
                let pending = self.unsettled().len();
                tracing::warn!(
                    context = %self.inner.name,
                    pending,
                    ?timeout,
                    "teardown timed out, aborting compensations"
                );
                self.inner.teardown.cancel();
                Teardown::TimedOut { pending }
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub(crate) fn teardown_token(&self) -> &CancellationToken {
        &self.inner.teardown
    }
}
