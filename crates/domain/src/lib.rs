//! # trellis-domain
//!
//! Pure domain model for the trellis controller runtime.
//!
//! ## Responsibilities
//! - Foundational types: device [`Identifier`](identifier::Identifier)s and typed ids
//! - Define **state snapshots** ([`DeviceState`](entity::DeviceState)) and the typed
//!   **state shapes** they carry (lights, switches, sensors, covers, locks, raw attributes)
//! - Define **commands** (`turn_on`, `set_brightness`, `lock`, …)
//! - Provide **attribute access** and **wire-token normalization** for mapping
//!   loosely-typed backend payloads onto closed enumerations
//! - Define the **error taxonomy** shared by every layer
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod identifier;
pub mod naming;

pub mod command;
pub mod entity;
