//! worldclock library - dual time zone clock sensor with a reminder email
//!
//! This module exports the clock core and its host plumbing for integration testing.

pub mod cli;
pub mod config;
pub mod error;
pub mod format;
pub mod notify;
pub mod redact;
pub mod scheduler;
pub mod sensor;
pub mod server;
pub mod store;
pub mod time;
