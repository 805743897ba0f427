//! Automation runtime — turns enabled flags into execution contexts.
//!
//! For every registered [`Automation`] the runtime follows the
//! [`AutomationHost`]'s enabled stream: when it turns `true` a fresh
//! [`ExecutionContext`] is created and the automation is started inside it;
//! when it turns `false` the context is shut down, cancelling in-flight
//! commands and waiting for their compensations.
//!
//! Command failures inside an automation are logged and never stop the
//! runtime. Structural errors (configuration, parsing, context misuse) are
//! fatal and returned from [`AutomationRuntime::run`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use trellis_domain::error::TrellisError;
use trellis_domain::id::AutomationId;

use crate::execution_context::{ExecutionContext, Teardown};
use crate::ports::{AutomationHost, Scheduler};

/// Default bound on how long disabling an automation waits for compensations.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Something the runtime can enable and disable: an automation, a scene or a
/// schedule.
pub trait Automation: Send + Sync + 'static {
    fn id(&self) -> &AutomationId;

    /// Start the automation. Runs with `ctx` ambient; long-lived work must be
    /// started through `ctx` ([`ExecutionContext::every`],
    /// [`ExecutionContext::on_state`], [`ExecutionContext::spawn`]) so it
    /// stops when the automation is disabled.
    ///
    /// # Errors
    ///
    /// Structural errors stop the runtime; command failures are logged and
    /// the automation is torn down.
    fn start(&self, ctx: &ExecutionContext) -> BoxFuture<'static, Result<(), TrellisError>>;
}

/// Supervises a set of automations.
pub struct AutomationRuntime {
    host: Arc<dyn AutomationHost>,
    scheduler: Arc<dyn Scheduler>,
    teardown_timeout: Duration,
    automations: Vec<Arc<dyn Automation>>,
}

impl AutomationRuntime {
    #[must_use]
    pub fn new(host: Arc<dyn AutomationHost>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            host,
            scheduler,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            automations: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn register(mut self, automation: Arc<dyn Automation>) -> Self {
        self.automations.push(automation);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.automations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.automations.is_empty()
    }

    /// Supervise every registered automation until `shutdown` is cancelled,
    /// then tear all active ones down.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error raised by an automation. Every other
    /// automation is torn down before returning.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), TrellisError> {
        let mut supervisors = JoinSet::new();
        for automation in self.automations {
            let supervisor = Supervisor {
                automation,
                host: Arc::clone(&self.host),
                scheduler: Arc::clone(&self.scheduler),
                teardown_timeout: self.teardown_timeout,
                shutdown: shutdown.clone(),
            };
            supervisors.spawn(supervisor.run());
        }

        let mut failure = None;
        while let Some(joined) = supervisors.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(%error, "automation failed, stopping runtime");
                    shutdown.cancel();
                    failure.get_or_insert(error);
                }
                Err(error) => {
                    tracing::error!(%error, "automation supervisor aborted");
                }
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct Supervisor {
    automation: Arc<dyn Automation>,
    host: Arc<dyn AutomationHost>,
    scheduler: Arc<dyn Scheduler>,
    teardown_timeout: Duration,
    shutdown: CancellationToken,
}

/// Why an automation stopped starting before it finished.
enum Interrupt {
    Disabled,
    Stopped,
}

/// Resolves on the first `false` flag, or when the flag stream ends.
async fn until_disabled(flags: &mut BoxStream<'static, bool>) -> Interrupt {
    loop {
        match flags.next().await {
            Some(true) => {}
            Some(false) => return Interrupt::Disabled,
            None => return Interrupt::Stopped,
        }
    }
}

impl Supervisor {
    #[tracing::instrument(skip_all, fields(automation = %self.automation.id()))]
    async fn run(self) -> Result<(), TrellisError> {
        let id = self.automation.id().clone();
        let mut flags = self.host.is_enabled(&id);
        self.host.on_initialized(&id);

        let mut active: Option<ExecutionContext> = None;
        loop {
            let flag = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => None,
                flag = flags.next() => flag,
            };
            match flag {
                Some(true) if active.is_none() => {
                    let ctx = ExecutionContext::new(id.as_str(), Arc::clone(&self.scheduler));
                    // Starting may wait on device commands; a disable or a
                    // shutdown must still reach the context meanwhile.
                    let started = tokio::select! {
                        biased;
                        () = self.shutdown.cancelled() => Err(Interrupt::Stopped),
                        interrupt = until_disabled(&mut flags) => Err(interrupt),
                        result = self.start(&ctx) => Ok(result),
                    };
                    match started {
                        Ok(Ok(())) => active = Some(ctx),
                        Ok(Err(error)) if error.is_fatal() => {
                            self.teardown(&ctx).await;
                            return Err(error);
                        }
                        Ok(Err(error)) => {
                            tracing::warn!(%error, "automation failed to start");
                            self.teardown(&ctx).await;
                        }
                        Err(Interrupt::Disabled) => {
                            tracing::debug!("automation disabled while starting");
                            self.teardown(&ctx).await;
                        }
                        Err(Interrupt::Stopped) => {
                            self.teardown(&ctx).await;
                            return Ok(());
                        }
                    }
                }
                Some(false) => {
                    if let Some(ctx) = active.take() {
                        self.teardown(&ctx).await;
                    }
                }
                Some(true) => {}
                None => {
                    if let Some(ctx) = active.take() {
                        self.teardown(&ctx).await;
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn start(&self, ctx: &ExecutionContext) -> Result<(), TrellisError> {
        tracing::info!("enabling automation");
        let automation = Arc::clone(&self.automation);
        let inner = ctx.clone();
        ctx.run(async move { automation.start(&inner).await })?
            .await
    }

    async fn teardown(&self, ctx: &ExecutionContext) {
        tracing::info!("disabling automation");
        match ctx.shutdown(self.teardown_timeout).await {
            Teardown::Complete => tracing::debug!("automation torn down"),
            Teardown::TimedOut { pending } => {
                tracing::warn!(pending, "automation teardown timed out");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;
    use tokio::time::sleep;

    use trellis_domain::error::{CommandFailure, ConfigurationError};

    use super::*;
    use crate::automation_host::InProcessAutomationHost;
    use crate::operation::{ActionError, Operation, PhaseOutcome, action};
    use crate::scheduler::TokioScheduler;

    /// Starts one long command per enable and records its operation.
    struct LongCommand {
        id: AutomationId,
        starts: AtomicUsize,
        compensations: Arc<AtomicUsize>,
        operations: Mutex<Vec<Operation>>,
        wait_for_commit: bool,
    }

    impl LongCommand {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                id: AutomationId::new(name),
                starts: AtomicUsize::new(0),
                compensations: Arc::new(AtomicUsize::new(0)),
                operations: Mutex::new(Vec::new()),
                wait_for_commit: false,
            })
        }

        /// Like [`LongCommand::new`], but `start` only returns once the
        /// command has committed.
        fn blocking(name: &str) -> Arc<Self> {
            Arc::new(Self {
                id: AutomationId::new(name),
                starts: AtomicUsize::new(0),
                compensations: Arc::new(AtomicUsize::new(0)),
                operations: Mutex::new(Vec::new()),
                wait_for_commit: true,
            })
        }
    }

    impl Automation for LongCommand {
        fn id(&self) -> &AutomationId {
            &self.id
        }

        fn start(&self, ctx: &ExecutionContext) -> BoxFuture<'static, Result<(), TrellisError>> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let compensations = Arc::clone(&self.compensations);
            let op = Operation::builder("long")
                .context(ctx)
                .commit(action(|_| async {
                    sleep(Duration::from_secs(3600)).await;
                    Ok::<(), ActionError>(())
                }))
                .compensate(action(move |_| async move {
                    compensations.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), ActionError>(())
                }))
                .start();
            self.operations.lock().unwrap().push(op.clone());
            let wait_for_commit = self.wait_for_commit;
            async move {
                if wait_for_commit {
                    op.committed().await;
                }
                Ok(())
            }
            .boxed()
        }
    }

    struct Failing {
        id: AutomationId,
        error: fn() -> TrellisError,
    }

    impl Automation for Failing {
        fn id(&self) -> &AutomationId {
            &self.id
        }

        fn start(&self, _ctx: &ExecutionContext) -> BoxFuture<'static, Result<(), TrellisError>> {
            let error = (self.error)();
            async move { Err(error) }.boxed()
        }
    }

    fn runtime(host: &Arc<InProcessAutomationHost>) -> AutomationRuntime {
        AutomationRuntime::new(
            Arc::clone(host) as Arc<dyn AutomationHost>,
            Arc::new(TokioScheduler),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn should_cancel_in_flight_commands_when_automation_disabled() {
        let host = Arc::new(InProcessAutomationHost::new());
        let automation = LongCommand::new("night");
        host.set_enabled(automation.id(), true);
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(
            runtime(&host)
                .register(Arc::clone(&automation) as Arc<dyn Automation>)
                .run(shutdown.clone()),
        );

        sleep(Duration::from_secs(1)).await;
        assert_eq!(automation.starts.load(Ordering::SeqCst), 1);
        assert_eq!(host.initialized(), vec![AutomationId::new("night")]);

        host.set_enabled(automation.id(), false);
        let op = automation.operations.lock().unwrap()[0].clone();
        assert_eq!(op.committed().await, PhaseOutcome::Cancelled);
        assert_eq!(op.compensated().await, PhaseOutcome::Succeeded);
        assert_eq!(automation.compensations.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        running.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn should_cancel_pending_commit_when_disabled_while_starting() {
        let host = Arc::new(InProcessAutomationHost::new());
        let automation = LongCommand::blocking("slow");
        host.set_enabled(automation.id(), true);
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(
            runtime(&host)
                .register(Arc::clone(&automation) as Arc<dyn Automation>)
                .run(shutdown.clone()),
        );

        sleep(Duration::from_secs(1)).await;
        let op = automation.operations.lock().unwrap()[0].clone();
        assert!(!op.is_settled());

        host.set_enabled(automation.id(), false);
        sleep(Duration::from_secs(10)).await;
        assert_eq!(op.committed().await, PhaseOutcome::Cancelled);
        assert_eq!(automation.compensations.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        sleep(Duration::from_secs(10)).await;
        assert!(running.is_finished());
        running.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_when_shutdown_requested_while_starting() {
        let host = Arc::new(InProcessAutomationHost::new());
        let automation = LongCommand::blocking("slow");
        host.set_enabled(automation.id(), true);
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(
            runtime(&host)
                .register(Arc::clone(&automation) as Arc<dyn Automation>)
                .run(shutdown.clone()),
        );

        sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        running.await.unwrap().unwrap();

        let op = automation.operations.lock().unwrap()[0].clone();
        assert_eq!(op.committed().await, PhaseOutcome::Cancelled);
        assert_eq!(op.compensated().await, PhaseOutcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn should_start_again_with_fresh_context_when_re_enabled() {
        let host = Arc::new(InProcessAutomationHost::new());
        let automation = LongCommand::new("toggle");
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(
            runtime(&host)
                .register(Arc::clone(&automation) as Arc<dyn Automation>)
                .run(shutdown.clone()),
        );

        for enabled in [true, false, true] {
            host.set_enabled(automation.id(), enabled);
            sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(automation.starts.load(Ordering::SeqCst), 2);
        let operations = automation.operations.lock().unwrap().clone();
        assert_ne!(operations[0].context_id(), operations[1].context_id());
        assert!(operations[0].is_settled());
        assert!(!operations[1].is_settled());

        shutdown.cancel();
        running.await.unwrap().unwrap();
        assert!(operations[1].is_settled());
    }

    #[tokio::test(start_paused = true)]
    async fn should_stop_runtime_when_automation_reports_configuration_error() {
        let host = Arc::new(InProcessAutomationHost::new());
        let id = AutomationId::new("broken");
        host.set_enabled(&id, true);
        let failing = Arc::new(Failing {
            id,
            error: || {
                ConfigurationError::UnboundIdentifier {
                    identifier: "light.ghost".parse().unwrap(),
                }
                .into()
            },
        });

        let result = runtime(&host)
            .register(failing)
            .run(CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TrellisError::Configuration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn should_keep_running_when_automation_reports_command_failure() {
        let host = Arc::new(InProcessAutomationHost::new());
        let id = AutomationId::new("flaky");
        host.set_enabled(&id, true);
        let failing = Arc::new(Failing {
            id,
            error: || {
                CommandFailure::Unavailable {
                    identifier: "light.porch".parse().unwrap(),
                }
                .into()
            },
        });
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(runtime(&host).register(failing).run(shutdown.clone()));

        sleep(Duration::from_secs(5)).await;
        assert!(!running.is_finished());
        shutdown.cancel();
        running.await.unwrap().unwrap();
    }
}
