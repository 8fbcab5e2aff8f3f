//! Operator API server for the Copydesk content pipeline.
//!
//! Provides the HTTP surface for schedules, manual runs, queue control and
//! the activity log.

pub mod error;
pub mod routes;
pub mod state;

pub use state::{AppState, Backends};
