//! Operations — the three-phase unit of asynchronous work.
//!
//! Every command and every automation reaction runs as an [`Operation`]:
//!
//! 1. **commit** fires the work (typically an optimistic local change plus
//!    the request to the device);
//! 2. **extend** runs once commit succeeded and waits for confirmation
//!    (typically the device's acknowledgement);
//! 3. **compensate** runs only if commit or extend ended in *cancellation*,
//!    to clean up after work that was aborted before it was confirmed.
//!
//! Waiters observe each phase through [`Operation::committed`],
//! [`Operation::extended`] and [`Operation::compensated`]. These never
//! return an error: failures are logged where they happen and the wait
//! settles with a [`PhaseOutcome`]. One failed device command must never
//! take the controller down.
//!
//! Settlement rules:
//!
//! | commit | extend | `committed` | `extended` | `compensated` |
//! |--------|--------|-------------|------------|---------------|
//! | failed | — | failed | failed | skipped, at once |
//! | cancelled | — | cancelled | cancelled | when compensate settles |
//! | succeeded | failed | succeeded | failed | skipped, at once |
//! | succeeded | cancelled | succeeded | cancelled | when compensate settles |
//! | succeeded | succeeded | succeeded | succeeded | skipped, at once |
//!
//! Extend starts only after commit has succeeded.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use trellis_domain::error::{CommandFailure, TrellisError};
use trellis_domain::id::{ContextId, OperationId};

use crate::execution_context::ExecutionContext;

/// How one phase of an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Succeeded,
    /// The action returned an error (already logged).
    Failed,
    /// Cancellation was requested before the action finished.
    Cancelled,
    /// Compensation was not needed.
    Skipped,
}

impl PhaseOutcome {
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Merge the outcomes of several operations: any failure wins over any
    /// cancellation, which wins over success. An empty or all-skipped set
    /// merges to success / skipped respectively.
    fn merge(outcomes: &[Self]) -> Self {
        if outcomes.contains(&Self::Failed) {
            Self::Failed
        } else if outcomes.contains(&Self::Cancelled) {
            Self::Cancelled
        } else if !outcomes.is_empty() && outcomes.iter().all(|o| *o == Self::Skipped) {
            Self::Skipped
        } else {
            Self::Succeeded
        }
    }
}

/// Why an action did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The action observed its cancellation token and stopped.
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] TrellisError),
}

impl From<CommandFailure> for ActionError {
    fn from(err: CommandFailure) -> Self {
        Self::Failed(err.into())
    }
}

/// Boxed future returned by an [`Action`].
pub type ActionFuture = BoxFuture<'static, Result<(), ActionError>>;

/// One phase's work: receives the phase's cancellation token and eventually
/// settles.
pub type Action = Box<dyn FnOnce(CancellationToken) -> ActionFuture + Send>;

/// Box a closure into an [`Action`].
pub fn action<F, Fut>(f: F) -> Action
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
{
    Box::new(move |token| f(token).boxed())
}

type PhaseSender = watch::Sender<Option<PhaseOutcome>>;

struct Inner {
    id: OperationId,
    label: String,
    context: Option<ContextId>,
    commit: PhaseSender,
    extend: PhaseSender,
    compensate: PhaseSender,
    /// Cancels commit and extend.
    cancel: CancellationToken,
    /// Aborts a running compensation (teardown deadline).
    abort_compensation: CancellationToken,
    /// Inputs of a combined operation.
    parts: Vec<Operation>,
}

impl Inner {
    fn new(label: String, context: Option<&ExecutionContext>, parts: Vec<Operation>) -> Self {
        let (cancel, abort_compensation) = match context {
            Some(ctx) => (
                ctx.cancellation_token().child_token(),
                ctx.teardown_token().child_token(),
            ),
            None => (CancellationToken::new(), CancellationToken::new()),
        };
        Self {
            id: OperationId::new(),
            label,
            context: context.map(ExecutionContext::id),
            commit: watch::Sender::new(None),
            extend: watch::Sender::new(None),
            compensate: watch::Sender::new(None),
            cancel,
            abort_compensation,
            parts,
        }
    }

    fn settle(&self, commit: PhaseOutcome, extend: PhaseOutcome, compensate: PhaseOutcome) {
        self.commit.send_replace(Some(commit));
        self.extend.send_replace(Some(extend));
        self.compensate.send_replace(Some(compensate));
    }
}

/// Handle to a running three-phase unit of work. Cheap to clone.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("commit", &*self.inner.commit.borrow())
            .field("extend", &*self.inner.extend.borrow())
            .field("compensate", &*self.inner.compensate.borrow())
            .finish_non_exhaustive()
    }
}

/// Which execution context a new operation attaches to.
enum Attach {
    Ambient,
    Explicit(ExecutionContext),
    Detached,
}

/// Step-by-step builder for [`Operation`].
pub struct OperationBuilder {
    label: String,
    commit: Option<Action>,
    extend: Option<Action>,
    compensate: Option<Action>,
    attach: Attach,
}

impl OperationBuilder {
    #[must_use]
    pub fn commit(mut self, action: Action) -> Self {
        self.commit = Some(action);
        self
    }

    #[must_use]
    pub fn extend(mut self, action: Action) -> Self {
        self.extend = Some(action);
        self
    }

    #[must_use]
    pub fn compensate(mut self, action: Action) -> Self {
        self.compensate = Some(action);
        self
    }

    /// Attach to `ctx` instead of the ambient context.
    #[must_use]
    pub fn context(mut self, ctx: &ExecutionContext) -> Self {
        self.attach = Attach::Explicit(ctx.clone());
        self
    }

    /// Do not attach to any context, even if one is ambient.
    #[must_use]
    pub fn detached(mut self) -> Self {
        self.attach = Attach::Detached;
        self
    }

    /// Start the operation. The commit phase begins immediately on a spawned
    /// task; the operation registers with its context before this returns.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(self) -> Operation {
        let context = match self.attach {
            Attach::Ambient => ExecutionContext::current(),
            Attach::Explicit(ctx) => Some(ctx),
            Attach::Detached => None,
        };
        let inner = Arc::new(Inner::new(self.label, context.as_ref(), Vec::new()));
        let op = Operation {
            inner: Arc::clone(&inner),
        };
        if let Some(ctx) = &context {
            ctx.attach(op.clone());
        }

        let span = tracing::debug_span!("operation", operation_id = %inner.id, label = %inner.label);
        let driver = drive(inner, self.commit, self.extend, self.compensate);
        tokio::spawn(ExecutionContext::scoped(context, driver).instrument(span));
        op
    }
}

impl Operation {
    /// Create a builder. Absent phases behave as already succeeded.
    #[must_use]
    pub fn builder(label: impl Into<String>) -> OperationBuilder {
        OperationBuilder {
            label: label.into(),
            commit: None,
            extend: None,
            compensate: None,
            attach: Attach::Ambient,
        }
    }

    /// Shorthand for an operation with the given phases, attached to the
    /// ambient context.
    #[must_use]
    pub fn create(
        label: impl Into<String>,
        commit: Action,
        extend: Option<Action>,
        compensate: Option<Action>,
    ) -> Self {
        let mut builder = Self::builder(label).commit(commit);
        builder.extend = extend;
        builder.compensate = compensate;
        builder.start()
    }

    /// An operation that has already succeeded; nothing is spawned.
    #[must_use]
    pub fn completed(label: impl Into<String>) -> Self {
        let inner = Inner::new(label.into(), None, Vec::new());
        inner.settle(
            PhaseOutcome::Succeeded,
            PhaseOutcome::Succeeded,
            PhaseOutcome::Skipped,
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    /// An operation whose commit has already failed with `error`. The error
    /// is logged here, like any other phase failure.
    #[must_use]
    pub fn failed(label: impl Into<String>, error: impl Into<TrellisError>) -> Self {
        let inner = Inner::new(label.into(), None, Vec::new());
        let error = error.into();
        tracing::warn!(operation_id = %inner.id, label = %inner.label, phase = "commit", %error, "operation phase failed");
        inner.settle(
            PhaseOutcome::Failed,
            PhaseOutcome::Failed,
            PhaseOutcome::Skipped,
        );
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Join several operations into one: each phase of the result settles
    /// once the same phase of every input has settled. Cancelling the result
    /// cancels every input.
    #[must_use]
    pub fn combine(label: impl Into<String>, operations: Vec<Operation>) -> Self {
        let context = ExecutionContext::current();
        let inner = Arc::new(Inner::new(label.into(), context.as_ref(), operations));
        let op = Self {
            inner: Arc::clone(&inner),
        };
        if let Some(ctx) = &context {
            ctx.attach(op.clone());
        }

        let span = tracing::debug_span!("operation", operation_id = %inner.id, label = %inner.label);
        tokio::spawn(drive_combined(inner).instrument(span));
        op
    }

    #[must_use]
    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The context this operation attached to at creation, if any.
    #[must_use]
    pub fn context_id(&self) -> Option<ContextId> {
        self.inner.context
    }

    /// Request cancellation of the commit (or extend) phase.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
        for part in &self.inner.parts {
            part.cancel();
        }
    }

    /// Wait for the commit phase to settle.
    pub async fn committed(&self) -> PhaseOutcome {
        wait(&self.inner.commit).await
    }

    /// Wait for the extend phase to settle (implies commit has settled).
    pub async fn extended(&self) -> PhaseOutcome {
        wait(&self.inner.extend).await
    }

    /// Wait for the compensate phase to settle, i.e. full settlement.
    pub async fn compensated(&self) -> PhaseOutcome {
        wait(&self.inner.compensate).await
    }

    /// Whether the extend phase has settled.
    #[must_use]
    pub fn is_extended(&self) -> bool {
        self.inner.extend.borrow().is_some()
    }

    /// Whether every phase has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.compensate.borrow().is_some()
    }

    pub(crate) fn abort_compensation(&self) {
        self.inner.abort_compensation.cancel();
        for part in &self.inner.parts {
            part.abort_compensation();
        }
    }
}

async fn wait(phase: &PhaseSender) -> PhaseOutcome {
    let mut rx = phase.subscribe();
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(value) => *value,
        Err(_) => None,
    };
    outcome.unwrap_or(PhaseOutcome::Failed)
}

async fn drive(
    inner: Arc<Inner>,
    commit: Option<Action>,
    extend: Option<Action>,
    compensate: Option<Action>,
) {
    let committed = run_phase("commit", commit, &inner.cancel).await;
    inner.commit.send_replace(Some(committed));

    let extended = if committed.is_success() {
        run_phase("extend", extend, &inner.cancel).await
    } else {
        committed
    };
    inner.extend.send_replace(Some(extended));

    let compensated = if extended == PhaseOutcome::Cancelled {
        run_phase("compensate", compensate, &inner.abort_compensation).await
    } else {
        PhaseOutcome::Skipped
    };
    inner.compensate.send_replace(Some(compensated));
}

async fn run_phase(
    phase: &'static str,
    action: Option<Action>,
    token: &CancellationToken,
) -> PhaseOutcome {
    let Some(action) = action else {
        return PhaseOutcome::Succeeded;
    };
    if token.is_cancelled() {
        tracing::debug!(phase, "phase cancelled before start");
        return PhaseOutcome::Cancelled;
    }

    let work = AssertUnwindSafe(action(token.clone())).catch_unwind();
    let result = tokio::select! {
        biased;
        result = work => result,
        () = token.cancelled() => Ok(Err(ActionError::Cancelled)),
    };

    match result {
        Ok(Ok(())) => PhaseOutcome::Succeeded,
        Ok(Err(ActionError::Cancelled)) => {
            tracing::debug!(phase, "phase cancelled");
            PhaseOutcome::Cancelled
        }
        Ok(Err(ActionError::Failed(error))) => {
            tracing::warn!(phase, %error, "operation phase failed");
            PhaseOutcome::Failed
        }
        Err(_) => {
            tracing::error!(phase, "operation phase panicked");
            PhaseOutcome::Failed
        }
    }
}

async fn drive_combined(inner: Arc<Inner>) {
    let phases = async {
        let commits = join_all(inner.parts.iter().map(Operation::committed)).await;
        inner.commit.send_replace(Some(PhaseOutcome::merge(&commits)));

        let extends = join_all(inner.parts.iter().map(Operation::extended)).await;
        inner.extend.send_replace(Some(PhaseOutcome::merge(&extends)));

        let compensations = join_all(inner.parts.iter().map(Operation::compensated)).await;
        inner
            .compensate
            .send_replace(Some(PhaseOutcome::merge(&compensations)));
    };

    // Context disposal cancels this operation's own tokens; forward that to
    // the inputs, which may have been created outside the context.
    let forward_cancel = async {
        inner.cancel.cancelled().await;
        for part in &inner.parts {
            part.cancel();
        }
        std::future::pending::<()>().await;
    };
    let forward_abort = async {
        inner.abort_compensation.cancelled().await;
        for part in &inner.parts {
            part.abort_compensation();
        }
        std::future::pending::<()>().await;
    };

    tokio::select! {
        () = phases => {}
        () = forward_cancel => {}
        () = forward_abort => {}
    }
}
