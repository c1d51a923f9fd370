//! Application layer: use-case orchestration over the service engines.

pub mod sneak_tracker;

pub use sneak_tracker::{CaptureOptions, SneakTracker};
