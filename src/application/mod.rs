pub mod bootstrap;
pub mod calendar_sync;
pub mod day_buckets;
pub mod event_merge;
pub mod overlap;
pub mod sync_status;
pub mod workspace;
