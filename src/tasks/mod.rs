//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Stale cleanup: drops entries that have been expired longer than the
//!   stale-retention window

mod cleanup;

pub use cleanup::spawn_cleanup_task;
