//! Wire types for the netscope discovery API.
//!
//! This crate contains the serde-serializable types exchanged with the
//! netscope server: the REST response envelope, the discovery request bodies,
//! and the per-session update payload pushed over the discovery event stream.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and phase classification
//! * 1:1 with the wire: Field names and phase casing match the server exactly
//! * Stable: Changes only when the server API changes
//!
//! Session tracking and request coordination are built on top of these types
//! in `netscope-runtime` and `netscope`.

pub mod endpoints;
pub mod envelope;
pub mod phase;
pub mod update;

pub use envelope::*;
pub use phase::*;
pub use update::*;
