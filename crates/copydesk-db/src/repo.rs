//! Repository traits and implementations.

pub mod activity;
pub mod schedule;
pub mod work_item;

pub use activity::{ActivityRepo, PgActivityRepo};
pub use schedule::{PgScheduleRepo, ScheduleRepo};
pub use work_item::{PgWorkItemRepo, WorkItemRepo};
