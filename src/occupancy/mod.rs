//! Occupants present at the time of an event.

pub mod time_of_day;
pub mod timeline;

pub use time_of_day::{DailyFactors, TimeOfDay, TimeOfDayFactors};
pub use timeline::{OccupancyTimeline, RecoveryPlan, RecoveryTables, RepairTime};
