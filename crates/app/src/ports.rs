//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the controller core and the outside
//! world. They are defined here (in `app`) so that both the core and the
//! adapter crates can depend on them without circular dependencies.

pub mod automation_host;
pub mod host;
pub mod scheduler;

pub use automation_host::AutomationHost;
pub use host::{Host, StateStream};
pub use scheduler::Scheduler;
