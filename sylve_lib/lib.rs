#![allow(clippy::module_name_repetitions)]

extern crate thiserror;

/// Core components
pub mod core;

pub use chrono;
pub use uuid;
