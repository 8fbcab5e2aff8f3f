//! Core domain types and traits for the Copydesk content pipeline.
//!
//! This crate contains:
//! - Typed identifiers for clients, work items, batches and schedules
//! - Work items and their automation status machine
//! - Schedules, recurrence rules and next-run calculation
//! - Queue names, retry policies and job payloads
//! - Collaborator traits (brief, article, approval, publish)
//! - Activity records and the injectable clock

pub mod activity;
pub mod clock;
pub mod collaborator;
pub mod error;
pub mod id;
pub mod job;
pub mod schedule;
pub mod work_item;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use id::{ActivityId, BatchId, ClientId, ScheduleId, WorkItemId};
