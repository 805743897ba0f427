//! Scenes and schedules — the built-in [`Automation`]s.
//!
//! A [`Scene`] applies its steps once, in order, when enabled. A
//! [`Schedule`] issues one step every period for as long as it is enabled.
//! Both route commands through the [`DeviceRegistry`], so every command they
//! send attaches to the automation's execution context and is cancelled
//! when the automation is disabled.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use trellis_domain::command::Command;
use trellis_domain::error::{ConfigurationError, TrellisError};
use trellis_domain::id::AutomationId;
use trellis_domain::identifier::Identifier;

use crate::automation_runtime::Automation;
use crate::execution_context::ExecutionContext;
use crate::operation::PhaseOutcome;
use crate::registry::DeviceRegistry;

/// One command sent to a group of devices.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneStep {
    pub command: Command,
    pub targets: Vec<Identifier>,
}

impl SceneStep {
    #[must_use]
    pub fn new(command: Command, targets: Vec<Identifier>) -> Self {
        Self { command, targets }
    }

    fn ensure_bound(&self, registry: &DeviceRegistry) -> Result<(), ConfigurationError> {
        self.targets
            .iter()
            .try_for_each(|target| registry.ensure_bound(target))
    }
}

/// Applies a fixed list of steps when enabled.
pub struct Scene {
    id: AutomationId,
    registry: Arc<DeviceRegistry>,
    steps: Vec<SceneStep>,
}

impl Scene {
    #[must_use]
    pub fn new(id: AutomationId, registry: Arc<DeviceRegistry>, steps: Vec<SceneStep>) -> Self {
        Self {
            id,
            registry,
            steps,
        }
    }

    #[must_use]
    pub fn steps(&self) -> &[SceneStep] {
        &self.steps
    }
}

impl Automation for Scene {
    fn id(&self) -> &AutomationId {
        &self.id
    }

    /// Validates every target up front, then sends each step once its
    /// predecessor has committed. Acknowledgements keep settling inside the
    /// context after this returns.
    fn start(&self, _ctx: &ExecutionContext) -> BoxFuture<'static, Result<(), TrellisError>> {
        let registry = Arc::clone(&self.registry);
        let steps = self.steps.clone();
        let id = self.id.clone();
        async move {
            for step in &steps {
                step.ensure_bound(&registry)?;
            }
            for step in &steps {
                let op = registry.execute(&step.command, &step.targets)?;
                let outcome = op.committed().await;
                if outcome != PhaseOutcome::Succeeded {
                    tracing::warn!(scene = %id, command = %step.command, ?outcome, "scene step did not commit");
                }
            }
            tracing::debug!(scene = %id, steps = steps.len(), "scene applied");
            Ok(())
        }
        .boxed()
    }
}

/// Issues a step every `period` while enabled, first after one period.
pub struct Schedule {
    id: AutomationId,
    registry: Arc<DeviceRegistry>,
    period: Duration,
    step: SceneStep,
}

impl Schedule {
    #[must_use]
    pub fn new(
        id: AutomationId,
        registry: Arc<DeviceRegistry>,
        period: Duration,
        step: SceneStep,
    ) -> Self {
        Self {
            id,
            registry,
            period,
            step,
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Automation for Schedule {
    fn id(&self) -> &AutomationId {
        &self.id
    }

    fn start(&self, ctx: &ExecutionContext) -> BoxFuture<'static, Result<(), TrellisError>> {
        if let Err(error) = self.step.ensure_bound(&self.registry) {
            return async move { Err(error.into()) }.boxed();
        }

        let registry = Arc::clone(&self.registry);
        let step = self.step.clone();
        let id = self.id.clone();
        let _ticker = ctx.every(self.period, move || {
            let registry = Arc::clone(&registry);
            let step = step.clone();
            let id = id.clone();
            async move {
                tracing::debug!(schedule = %id, command = %step.command, "schedule fired");
                match registry.execute(&step.command, &step.targets) {
                    Ok(op) => {
                        op.committed().await;
                    }
                    Err(error) => {
                        tracing::warn!(schedule = %id, %error, "scheduled command not sent");
                    }
                }
            }
        });
        async { Ok(()) }.boxed()
    }
}
