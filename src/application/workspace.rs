use crate::application::bootstrap::bootstrap_workspace;
use crate::application::calendar_sync::{
    CalendarSnapshot, CalendarSyncService, RefreshOutcome, RefreshRequest, RetryPolicy,
    SyncTrigger,
};
use crate::application::day_buckets::DayBucketBuilder;
use crate::application::overlap::OverlapFlags;
use crate::domain::models::{
    CalendarRange, CanonicalEvent, ConfidenceBand, DayBucket, EventCategory, SyncState,
    TaskPriority, TaskStatus,
};
use crate::infrastructure::config::CalendarConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{LocalTaskRecord, NowProvider};
use crate::infrastructure::task_sync_client::{ReqwestTaskSyncClient, TaskSyncClient};
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventView {
    pub id: String,
    pub title: String,
    pub start_at: String,
    pub end_at: String,
    pub category: EventCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_band: Option<ConfidenceBand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_progress: Option<f64>,
    pub has_overlap: bool,
}

impl EventView {
    fn from_event(event: &CanonicalEvent, overlaps: &OverlapFlags) -> Self {
        Self {
            id: event.id.clone(),
            title: event.title.clone(),
            start_at: event.start_at.to_rfc3339(),
            end_at: event.end_at.to_rfc3339(),
            category: event.category,
            status: event.status,
            priority: event.priority,
            estimated_hours: event.estimated_hours,
            actual_hours: event.actual_hours,
            confidence_band: event.confidence_band(),
            hours_progress: event.hours_progress(),
            has_overlap: overlaps.is_flagged(&event.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DayView {
    pub date: String,
    pub has_overlap: bool,
    pub events: Vec<EventView>,
}

impl DayView {
    fn from_bucket(bucket: &DayBucket, overlaps: &OverlapFlags) -> Self {
        Self {
            date: bucket.date.format("%Y-%m-%d").to_string(),
            has_overlap: bucket.has_overlap,
            events: bucket
                .events
                .iter()
                .map(|event| EventView::from_event(event, overlaps))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<SyncState> for SyncStatusResponse {
    fn from(state: SyncState) -> Self {
        Self {
            status: state.status.as_str().to_string(),
            last_synced_at: state.last_synced_at.map(|value| value.to_rfc3339()),
            error_message: state.error_message,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthViewResponse {
    pub generation: u64,
    pub range_start: String,
    pub range_end: String,
    pub days: Vec<DayView>,
    pub event_count: usize,
    pub overlap_count: usize,
    pub dropped_records: usize,
    pub clamped_records: usize,
    pub sync: SyncStatusResponse,
}

impl MonthViewResponse {
    fn from_snapshot(snapshot: &CalendarSnapshot, sync: SyncStatusResponse) -> Self {
        Self {
            generation: snapshot.generation,
            range_start: snapshot.range.start.format("%Y-%m-%d").to_string(),
            range_end: snapshot.range.end.format("%Y-%m-%d").to_string(),
            days: snapshot
                .days
                .iter()
                .map(|bucket| DayView::from_bucket(bucket, &snapshot.overlaps))
                .collect(),
            event_count: snapshot.events.len(),
            overlap_count: snapshot.overlaps.flagged_count(),
            dropped_records: snapshot.dropped_records,
            clamped_records: snapshot.clamped_records,
            sync,
        }
    }
}

/// Calendar facade over a workspace directory: config, activity log and the sync service.
pub struct CalendarWorkspace<C>
where
    C: TaskSyncClient,
{
    workspace_root: PathBuf,
    logs_dir: PathBuf,
    config: CalendarConfig,
    service: CalendarSyncService<C>,
    log_guard: Mutex<()>,
}

impl CalendarWorkspace<ReqwestTaskSyncClient> {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let client = ReqwestTaskSyncClient::new(
            &bootstrap.config.api_base_url,
            bootstrap.config.request_timeout,
        )?
        .with_access_token(bootstrap.config.api_token.clone());
        Ok(Self::from_parts(
            bootstrap.workspace_root,
            bootstrap.logs_dir,
            bootstrap.config,
            Arc::new(client),
        ))
    }
}

impl<C> CalendarWorkspace<C>
where
    C: TaskSyncClient,
{
    pub fn with_client(workspace_root: PathBuf, client: Arc<C>) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        Ok(Self::from_parts(
            bootstrap.workspace_root,
            bootstrap.logs_dir,
            bootstrap.config,
            client,
        ))
    }

    fn from_parts(
        workspace_root: PathBuf,
        logs_dir: PathBuf,
        config: CalendarConfig,
        client: Arc<C>,
    ) -> Self {
        let service = CalendarSyncService::new(client)
            .with_retry_policy(RetryPolicy {
                max_attempts: config.retry.max_attempts,
                base_delay_ms: config.retry.base_delay_ms,
            })
            .with_time_zone(config.time_zone);
        Self {
            workspace_root,
            logs_dir,
            config,
            service,
            log_guard: Mutex::new(()),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.service = self.service.with_now_provider(now_provider);
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn config(&self) -> &CalendarConfig {
        &self.config
    }

    /// Reconciles the month grid of `year`/`month` and returns what the grid should render.
    ///
    /// A failed fetch is not an error here: the previous view comes back with an error status.
    pub async fn sync_month(
        &self,
        project_id: &str,
        year: i32,
        month: u32,
        local: Vec<LocalTaskRecord>,
        trigger: SyncTrigger,
    ) -> Result<MonthViewResponse, String> {
        let range = CalendarRange::month_grid(year, month, self.config.week_start)
            .map_err(|message| self.command_error("sync_month", &InfraError::InvalidRange(message)))?;
        let request = RefreshRequest {
            project_id: project_id.to_string(),
            range,
            local,
            trigger,
        };

        let outcome = self
            .service
            .refresh(request)
            .await
            .map_err(|error| self.command_error("sync_month", &error))?;
        match &outcome {
            RefreshOutcome::Applied(snapshot) => self.log_info(
                "sync_month",
                &format!(
                    "project={project_id} trigger={} generation={} events={} dropped={}",
                    trigger.as_str(),
                    snapshot.generation,
                    snapshot.events.len(),
                    snapshot.dropped_records
                ),
            ),
            RefreshOutcome::Failed(message) => self.log_error("sync_month", message),
            RefreshOutcome::Coalesced | RefreshOutcome::Superseded => {}
        }

        self.current_view(&range)
            .map_err(|error| self.command_error("sync_month", &error))
    }

    pub fn month_view(&self) -> Result<Option<MonthViewResponse>, String> {
        let snapshot = self
            .service
            .snapshot()
            .map_err(|error| self.command_error("month_view", &error))?;
        let Some(snapshot) = snapshot else {
            return Ok(None);
        };
        let sync = self.sync_status()?;
        Ok(Some(MonthViewResponse::from_snapshot(&snapshot, sync)))
    }

    pub fn sync_status(&self) -> Result<SyncStatusResponse, String> {
        self.service
            .sync_state()
            .map(SyncStatusResponse::from)
            .map_err(|error| self.command_error("sync_status", &error))
    }

    /// Polls `year`/`month` at the configured interval until `shutdown` flips to true.
    pub async fn poll_month<F>(
        &self,
        project_id: &str,
        year: i32,
        month: u32,
        local_source: F,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), String>
    where
        F: Fn() -> Vec<LocalTaskRecord> + Send + Sync,
    {
        let range = CalendarRange::month_grid(year, month, self.config.week_start)
            .map_err(|message| self.command_error("poll_month", &InfraError::InvalidRange(message)))?;
        self.log_info(
            "poll_month",
            &format!(
                "project={project_id} every {}s",
                self.config.poll_interval.as_secs()
            ),
        );
        self.service
            .run_poller(
                || RefreshRequest {
                    project_id: project_id.to_string(),
                    range,
                    local: local_source(),
                    trigger: SyncTrigger::Poll,
                },
                self.config.poll_interval,
                shutdown,
            )
            .await
            .map_err(|error| self.command_error("poll_month", &error))
    }

    fn current_view(&self, range: &CalendarRange) -> Result<MonthViewResponse, InfraError> {
        let sync = SyncStatusResponse::from(self.service.sync_state()?);
        if let Some(snapshot) = self.service.snapshot()? {
            return Ok(MonthViewResponse::from_snapshot(&snapshot, sync));
        }

        let overlaps = OverlapFlags::default();
        let days = DayBucketBuilder::new(self.config.time_zone).build(range, &[], &overlaps);
        Ok(MonthViewResponse {
            generation: 0,
            range_start: range.start.format("%Y-%m-%d").to_string(),
            range_end: range.end.format("%Y-%m-%d").to_string(),
            days: days
                .iter()
                .map(|bucket| DayView::from_bucket(bucket, &overlaps))
                .collect(),
            event_count: 0,
            overlap_count: 0,
            dropped_records: 0,
            clamped_records: 0,
            sync,
        })
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}
