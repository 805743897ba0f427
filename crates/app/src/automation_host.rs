//! In-process automation host backed by `watch` channels.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use trellis_domain::id::AutomationId;

use crate::ports::AutomationHost;

/// [`AutomationHost`] whose enabled flags are set programmatically, e.g. from
/// configuration at start-up or by tests. Automations never mentioned are
/// disabled.
#[derive(Debug, Default)]
pub struct InProcessAutomationHost {
    flags: Mutex<HashMap<AutomationId, watch::Sender<bool>>>,
    initialized: Mutex<Vec<AutomationId>>,
}

impl InProcessAutomationHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable `id`. Observers only see actual changes.
    pub fn set_enabled(&self, id: &AutomationId, enabled: bool) {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        match flags.get(id) {
            Some(sender) => {
                sender.send_if_modified(|current| {
                    let changed = *current != enabled;
                    *current = enabled;
                    changed
                });
            }
            None => {
                flags.insert(id.clone(), watch::Sender::new(enabled));
            }
        }
    }

    #[must_use]
    pub fn is_enabled_now(&self, id: &AutomationId) -> bool {
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_some_and(|sender| *sender.borrow())
    }

    /// Automations the runtime has reported as initialized, in order.
    #[must_use]
    pub fn initialized(&self) -> Vec<AutomationId> {
        self.initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AutomationHost for InProcessAutomationHost {
    fn is_enabled(&self, id: &AutomationId) -> BoxStream<'static, bool> {
        let mut flags = self.flags.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = flags
            .entry(id.clone())
            .or_insert_with(|| watch::Sender::new(false));
        WatchStream::new(sender.subscribe()).boxed()
    }

    fn on_initialized(&self, id: &AutomationId) {
        tracing::debug!(automation = %id, "automation initialized");
        self.initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.clone());
    }
}
