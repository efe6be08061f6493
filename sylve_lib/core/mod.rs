/// Dataset and snapshot model
pub mod snapshot;

/// Replication planner
pub mod planner;

/// Time-windowed history retention
pub mod retention;

/// Cron schedule evaluation
pub mod schedule;
