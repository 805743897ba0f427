//! # trellis-app
//!
//! Controller core — the concurrency substrate, the binding registry and
//! **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters implement:
//!   - `Host` — serves device state streams and executes commands
//!   - `Scheduler` — the single clock all timers use
//!   - `AutomationHost` — external policy enabling/disabling automations
//! - Provide the **Operation / ExecutionContext** primitive: three-phase
//!   units of work (commit, extend, compensate) attached to an ambient scope
//!   that can drain or cancel everything it started
//! - Resolve identifiers to hosts through the **capability table** and cache
//!   one **Device** per identifier in the registry
//! - Run **automations** (scenes, schedules, custom ones) in their own
//!   execution context while the automation host keeps them enabled
//!
//! ## Dependency rule
//! Depends on `trellis-domain` only (plus tokio for tasks, channels and
//! time). Never imports adapter crates. Adapters depend on *this* crate, not
//! the reverse.

pub mod automation_host;
pub mod automation_runtime;
pub mod capability;
pub mod execution_context;
pub mod operation;
pub mod ports;
pub mod registry;
pub mod scene;
pub mod scheduler;
