//! Automation host port — external policy deciding which automations and
//! scenes are enabled.

use futures::stream::BoxStream;

use trellis_domain::id::AutomationId;

/// Drives the lifecycle of automations and scenes.
///
/// The [`AutomationRuntime`](crate::automation_runtime::AutomationRuntime)
/// creates an execution context each time an automation's flag turns `true`
/// and tears it down when it turns `false`.
pub trait AutomationHost: Send + Sync + 'static {
    /// Stream of enabled flags for `id`. The current value is expected as
    /// the first item; repeated values are tolerated.
    fn is_enabled(&self, id: &AutomationId) -> BoxStream<'static, bool>;

    /// Notification that the runtime has registered `id` and is now
    /// listening to its enabled flag.
    fn on_initialized(&self, _id: &AutomationId) {}
}
