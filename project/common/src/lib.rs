//! Shared definitions for the automount daemon and anything that renders its
//! state (panel indicators, notification bridges, the CLI).
//!
//! Nothing in here performs I/O: locations, mount observations, events and the
//! aggregated status are plain data so that consumers only depend on this crate.

pub mod event;
pub mod location;
pub mod status;

pub use event::*;
pub use location::*;
pub use status::*;
