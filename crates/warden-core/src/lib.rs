//! `warden-core`: configuration and shared error types for the warden
//! workspace.

pub mod config;
pub mod error;

pub use config::{JobConfig, ScheduleSpec, WardenConfig};
pub use error::{Result, WardenError};
