pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{bootstrap_workspace, BootstrapResult};
pub use application::calendar_sync::{
    CalendarSnapshot, CalendarSyncService, RefreshOutcome, RefreshRequest, RetryPolicy,
    SyncTrigger,
};
pub use application::day_buckets::DayBucketBuilder;
pub use application::event_merge::merge;
pub use application::overlap::{annotate_overlaps, intervals_overlap, OverlapFlags};
pub use application::sync_status::{BeginOutcome, SyncStatusTracker, SyncTicket};
pub use application::workspace::{
    CalendarWorkspace, DayView, EventView, MonthViewResponse, SyncStatusResponse,
};
pub use domain::models::{
    CalendarRange, CanonicalEvent, ConfidenceBand, DayBucket, EventCategory, SyncState,
    SyncStatus, TaskPriority, TaskStatus,
};
pub use infrastructure::config::{load_config, CalendarConfig};
pub use infrastructure::error::InfraError;
pub use infrastructure::event_mapper::{
    EventNormalizer, LocalTaskRecord, NormalizedBatch, RemoteTaskRecord, TaskRecord,
};
pub use infrastructure::task_sync_client::{
    ListTasksRequest, ReqwestTaskSyncClient, TaskSyncClient,
};
