use crate::application::day_buckets::DayBucketBuilder;
use crate::application::event_merge::merge;
use crate::application::overlap::{annotate_overlaps, OverlapFlags};
use crate::application::sync_status::{BeginOutcome, SyncStatusTracker, SyncTicket};
use crate::domain::models::{CalendarRange, CanonicalEvent, DayBucket, SyncState};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::{
    DefaultSchedulePolicy, EventNormalizer, LocalTaskRecord, NowProvider, RemoteTaskRecord,
    TaskRecord,
};
use crate::infrastructure::task_sync_client::{ListTasksRequest, TaskSyncClient};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::{sleep, Duration as TokioDuration, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Mount,
    RangeChange,
    Poll,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::RangeChange => "range_change",
            Self::Poll => "poll",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub project_id: String,
    pub range: CalendarRange,
    pub local: Vec<LocalTaskRecord>,
    pub trigger: SyncTrigger,
}

/// Render model produced by one accepted reconciliation pass.
#[derive(Debug, Clone)]
pub struct CalendarSnapshot {
    pub generation: u64,
    pub range: CalendarRange,
    pub events: Vec<CanonicalEvent>,
    pub overlaps: OverlapFlags,
    pub days: Vec<DayBucket>,
    pub dropped_records: usize,
    pub clamped_records: usize,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Applied(Arc<CalendarSnapshot>),
    Coalesced,
    Superseded,
    Failed(String),
}

pub struct CalendarSyncService<C>
where
    C: TaskSyncClient,
{
    client: Arc<C>,
    tracker: Mutex<SyncStatusTracker>,
    snapshot: Mutex<Option<Arc<CalendarSnapshot>>>,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
    time_zone: Tz,
}

impl<C> CalendarSyncService<C>
where
    C: TaskSyncClient,
{
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            tracker: Mutex::new(SyncStatusTracker::new()),
            snapshot: Mutex::new(None),
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
            time_zone: Tz::UTC,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_time_zone(mut self, time_zone: Tz) -> Self {
        self.time_zone = time_zone;
        self
    }

    pub fn sync_state(&self) -> Result<SyncState, InfraError> {
        Ok(self.lock_tracker()?.state())
    }

    pub fn snapshot(&self) -> Result<Option<Arc<CalendarSnapshot>>, InfraError> {
        Ok(self.lock_snapshot()?.clone())
    }

    pub async fn refresh(&self, request: RefreshRequest) -> Result<RefreshOutcome, InfraError> {
        let ticket = match self.lock_tracker()?.begin(request.range) {
            BeginOutcome::Started(ticket) => ticket,
            BeginOutcome::Coalesced => {
                tracing::debug!(
                    project_id = %request.project_id,
                    trigger = request.trigger.as_str(),
                    "sync already in flight for range, coalescing trigger"
                );
                return Ok(RefreshOutcome::Coalesced);
            }
        };

        let (window_start, window_end) = request.range.utc_window(&self.time_zone);
        let fetched = self
            .list_tasks_with_retry(
                &request.project_id,
                ListTasksRequest {
                    start: window_start,
                    end: window_end,
                },
            )
            .await;

        match fetched {
            Ok(records) => self.apply(&ticket, &request, records),
            Err(error) => {
                let message = error.to_string();
                if !self.lock_tracker()?.fail(&ticket, message.clone()) {
                    tracing::debug!(
                        generation = ticket.generation,
                        "discarding failure of superseded sync"
                    );
                    return Ok(RefreshOutcome::Superseded);
                }
                tracing::warn!(
                    project_id = %request.project_id,
                    trigger = request.trigger.as_str(),
                    error = %message,
                    "task sync failed, keeping previous calendar"
                );
                Ok(RefreshOutcome::Failed(message))
            }
        }
    }

    /// Re-triggers a poll refresh every `interval` until `shutdown` turns true.
    pub async fn run_poller<F>(
        &self,
        request_factory: F,
        interval: TokioDuration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), InfraError>
    where
        F: Fn() -> RefreshRequest + Send + Sync,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let mut request = request_factory();
                    request.trigger = SyncTrigger::Poll;
                    self.refresh(request).await?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn apply(
        &self,
        ticket: &SyncTicket,
        request: &RefreshRequest,
        records: Vec<RemoteTaskRecord>,
    ) -> Result<RefreshOutcome, InfraError> {
        let synced_at = (self.now_provider)();
        let normalizer = EventNormalizer::new(
            self.time_zone,
            DefaultSchedulePolicy::new(Arc::clone(&self.now_provider)),
        );
        let local_records: Vec<TaskRecord> =
            request.local.iter().cloned().map(TaskRecord::Local).collect();
        let remote_records: Vec<TaskRecord> = records.into_iter().map(TaskRecord::Remote).collect();
        let local_batch = normalizer.normalize_all(&local_records);
        let remote_batch = normalizer.normalize_all(&remote_records);

        let events = merge(&local_batch.events, &remote_batch.events);
        let overlaps = annotate_overlaps(&events);
        let days = DayBucketBuilder::new(self.time_zone).build(&request.range, &events, &overlaps);

        let snapshot = Arc::new(CalendarSnapshot {
            generation: ticket.generation,
            range: request.range,
            events,
            overlaps,
            days,
            dropped_records: local_batch.dropped_count() + remote_batch.dropped_count(),
            clamped_records: local_batch.clamped + remote_batch.clamped,
            synced_at,
        });

        {
            // publish under the tracker lock; a newer ticket must not interleave
            let mut tracker = self.lock_tracker()?;
            if !tracker.complete(ticket, synced_at) {
                tracing::debug!(
                    generation = ticket.generation,
                    latest = tracker.latest_generation(),
                    "discarding superseded sync response"
                );
                return Ok(RefreshOutcome::Superseded);
            }
            *self.lock_snapshot()? = Some(Arc::clone(&snapshot));
        }

        if snapshot.dropped_records > 0 {
            tracing::warn!(
                project_id = %request.project_id,
                dropped = snapshot.dropped_records,
                "dropped malformed synced task records"
            );
        }
        tracing::info!(
            project_id = %request.project_id,
            trigger = request.trigger.as_str(),
            generation = snapshot.generation,
            events = snapshot.events.len(),
            overlapping = snapshot.overlaps.flagged_count(),
            "calendar reconciled"
        );

        Ok(RefreshOutcome::Applied(snapshot))
    }

    async fn list_tasks_with_retry(
        &self,
        project_id: &str,
        request: ListTasksRequest,
    ) -> Result<Vec<RemoteTaskRecord>, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.client.list_tasks(project_id, request.clone()).await {
                Ok(records) => return Ok(records),
                Err(error) if self.should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    tracing::debug!(attempt, delay_ms = delay, error = %error, "retrying task sync");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn should_retry(&self, error: &InfraError) -> bool {
        matches!(error, InfraError::Network(_))
    }

    fn lock_tracker(&self) -> Result<MutexGuard<'_, SyncStatusTracker>, InfraError> {
        self.tracker
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("sync tracker lock poisoned: {error}")))
    }

    fn lock_snapshot(&self) -> Result<MutexGuard<'_, Option<Arc<CalendarSnapshot>>>, InfraError> {
        self.snapshot
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("calendar snapshot lock poisoned: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EventCategory, SyncStatus, TaskStatus};
    use crate::infrastructure::task_sync_client::ReqwestTaskSyncClient;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    #[derive(Debug, Clone)]
    enum FakeListResponse {
        Success(Vec<RemoteTaskRecord>),
        NetworkError,
        ApiError,
    }

    #[derive(Debug, Default)]
    struct FakeTaskSyncClient {
        responses: Mutex<VecDeque<FakeListResponse>>,
        requests: Mutex<Vec<ListTasksRequest>>,
        calls: AtomicUsize,
        hold_first_call: bool,
        release: Notify,
    }

    impl FakeTaskSyncClient {
        fn with_responses(responses: Vec<FakeListResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn holding_first_call(responses: Vec<FakeListResponse>) -> Self {
            Self {
                hold_first_call: true,
                ..Self::with_responses(responses)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskSyncClient for FakeTaskSyncClient {
        async fn list_tasks(
            &self,
            _project_id: &str,
            request: ListTasksRequest,
        ) -> Result<Vec<RemoteTaskRecord>, InfraError> {
            let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().expect("request log lock").push(request);
            let response = self
                .responses
                .lock()
                .expect("response queue lock")
                .pop_front()
                .unwrap_or(FakeListResponse::Success(Vec::new()));

            if self.hold_first_call && call_index == 0 {
                self.release.notified().await;
            }

            match response {
                FakeListResponse::Success(records) => Ok(records),
                FakeListResponse::NetworkError => {
                    Err(InfraError::Network("network error while listing synced tasks".to_string()))
                }
                FakeListResponse::ApiError => {
                    Err(InfraError::Api("task sync api error: http 500".to_string()))
                }
            }
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn june() -> CalendarRange {
        CalendarRange::month(2024, 6).expect("valid month")
    }

    fn july() -> CalendarRange {
        CalendarRange::month(2024, 7).expect("valid month")
    }

    fn remote(uid: &str, start: &str, end: &str) -> RemoteTaskRecord {
        RemoteTaskRecord {
            uid: Some(uid.to_string()),
            description: Some(format!("Remote {uid}")),
            start_date: Some(start.to_string()),
            end_date: Some(end.to_string()),
            estimated_hours: None,
            status: Some("completed".to_string()),
            priority: None,
        }
    }

    fn local(id: i64, start: &str, end: &str) -> LocalTaskRecord {
        LocalTaskRecord {
            id,
            description: format!("Local {id}"),
            title: None,
            category: EventCategory::Task,
            start_at: Some(fixed_time(start)),
            end_at: Some(fixed_time(end)),
            estimated_hours: Some(1.0),
            actual_hours: Some(0.5),
            status: Some(TaskStatus::Pending),
            priority: None,
            confidence_score: None,
        }
    }

    fn request(range: CalendarRange, local: Vec<LocalTaskRecord>) -> RefreshRequest {
        RefreshRequest {
            project_id: "17".to_string(),
            range,
            local,
            trigger: SyncTrigger::Manual,
        }
    }

    fn service(client: Arc<FakeTaskSyncClient>) -> CalendarSyncService<FakeTaskSyncClient> {
        let now = fixed_time("2024-06-10T08:00:00Z");
        CalendarSyncService::new(client)
            .with_retry_policy(RetryPolicy {
                max_attempts: 1,
                base_delay_ms: 1,
            })
            .with_now_provider(Arc::new(move || now))
    }

    fn applied(outcome: RefreshOutcome) -> Arc<CalendarSnapshot> {
        match outcome {
            RefreshOutcome::Applied(snapshot) => snapshot,
            other => panic!("expected applied refresh, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_merges_remote_over_local_and_reports_dropped_records() {
        let client = Arc::new(FakeTaskSyncClient::with_responses(vec![FakeListResponse::Success(
            vec![
                remote("1", "2024-06-10T09:30:00Z", "2024-06-10T11:00:00Z"),
                remote("broken", "not-a-date", "2024-06-10T11:00:00Z"),
                remote("2", "2024-06-11T09:00:00Z", "2024-06-11T10:00:00Z"),
            ],
        )]));
        let service = service(Arc::clone(&client));

        let snapshot = applied(
            service
                .refresh(request(
                    june(),
                    vec![local(1, "2024-06-10T09:00:00Z", "2024-06-10T10:00:00Z")],
                ))
                .await
                .expect("refresh"),
        );

        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.events[0].id, "1");
        assert_eq!(snapshot.events[0].start_at, fixed_time("2024-06-10T09:30:00Z"));
        assert_eq!(snapshot.events[0].end_at, fixed_time("2024-06-10T11:00:00Z"));
        assert_eq!(snapshot.events[0].status, Some(TaskStatus::Completed));
        assert_eq!(snapshot.events[0].actual_hours, Some(0.5));
        assert_eq!(snapshot.dropped_records, 1);
        assert_eq!(snapshot.days.len(), 30);
        assert_eq!(snapshot.days[9].events.len(), 1);

        let state = service.sync_state().expect("state");
        assert_eq!(state.status, SyncStatus::Idle);
        assert_eq!(state.last_synced_at, Some(fixed_time("2024-06-10T08:00:00Z")));

        let requests = client.requests.lock().expect("request log lock");
        assert_eq!(requests[0].start, fixed_time("2024-06-01T00:00:00Z"));
        assert_eq!(requests[0].end, fixed_time("2024-07-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn fetch_failure_sets_error_and_keeps_previous_snapshot() {
        let client = Arc::new(FakeTaskSyncClient::with_responses(vec![
            FakeListResponse::Success(vec![remote(
                "1",
                "2024-06-10T09:00:00Z",
                "2024-06-10T10:00:00Z",
            )]),
            FakeListResponse::NetworkError,
        ]));
        let service = service(Arc::clone(&client));

        let first = applied(service.refresh(request(june(), Vec::new())).await.expect("first"));
        let second = service.refresh(request(june(), Vec::new())).await.expect("second");

        match second {
            RefreshOutcome::Failed(message) => assert!(message.contains("network error")),
            other => panic!("expected failure, got {other:?}"),
        }
        let state = service.sync_state().expect("state");
        assert_eq!(state.status, SyncStatus::Error);
        assert!(state.error_message.is_some());

        let current = service.snapshot().expect("snapshot").expect("previous snapshot kept");
        assert_eq!(current.generation, first.generation);
        assert_eq!(current.events, first.events);
    }

    #[tokio::test]
    async fn payload_without_task_list_keeps_previous_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let listed = server
            .mock("GET", mockito::Matcher::Regex(r"^/api/v1/caldav/tasks/17".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"tasks":[{"uid":"u-1","description":"Draft plan","start_date":"2024-06-10T09:00:00Z","end_date":"2024-06-10T10:00:00Z"}]}"#,
            )
            .create_async()
            .await;
        let client = ReqwestTaskSyncClient::new(
            &format!("{}/api/v1", server.url()),
            TokioDuration::from_secs(5),
        )
        .expect("valid client");
        let service = CalendarSyncService::new(Arc::new(client)).with_retry_policy(RetryPolicy {
            max_attempts: 1,
            base_delay_ms: 1,
        });

        let first = applied(service.refresh(request(june(), Vec::new())).await.expect("first"));
        assert_eq!(first.events.len(), 1);

        listed.remove_async().await;
        let _not_found = server
            .mock("GET", mockito::Matcher::Regex(r"^/api/v1/caldav/tasks/17".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"detail":"calendar not found"}"#)
            .create_async()
            .await;

        let second = service.refresh(request(june(), Vec::new())).await.expect("second");

        assert!(matches!(second, RefreshOutcome::Failed(_)));
        assert_eq!(service.sync_state().expect("state").status, SyncStatus::Error);
        let current = service.snapshot().expect("snapshot").expect("previous snapshot kept");
        assert_eq!(current.generation, first.generation);
        assert_eq!(current.events[0].id, "u-1");
    }

    #[tokio::test]
    async fn refresh_retries_on_network_error() {
        let client = Arc::new(FakeTaskSyncClient::with_responses(vec![
            FakeListResponse::NetworkError,
            FakeListResponse::Success(vec![remote(
                "1",
                "2024-06-10T09:00:00Z",
                "2024-06-10T10:00:00Z",
            )]),
        ]));
        let service = service(Arc::clone(&client)).with_retry_policy(RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
        });

        let snapshot = applied(service.refresh(request(june(), Vec::new())).await.expect("refresh"));

        assert_eq!(snapshot.events.len(), 1);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn api_errors_are_not_retried() {
        let client = Arc::new(FakeTaskSyncClient::with_responses(vec![FakeListResponse::ApiError]));
        let service = service(Arc::clone(&client)).with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        });

        let outcome = service.refresh(request(june(), Vec::new())).await.expect("refresh");

        assert!(matches!(outcome, RefreshOutcome::Failed(_)));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn trigger_for_in_flight_range_is_coalesced() {
        let client = Arc::new(FakeTaskSyncClient::holding_first_call(vec![FakeListResponse::Success(
            vec![remote("1", "2024-06-10T09:00:00Z", "2024-06-10T10:00:00Z")],
        )]));
        let service = Arc::new(service(Arc::clone(&client)));

        let in_flight = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.refresh(request(june(), Vec::new())).await })
        };
        while client.calls() < 1 {
            tokio::task::yield_now().await;
        }
        assert_eq!(service.sync_state().expect("state").status, SyncStatus::Syncing);

        let second = service.refresh(request(june(), Vec::new())).await.expect("second");
        assert!(matches!(second, RefreshOutcome::Coalesced));
        assert_eq!(client.calls(), 1);

        client.release.notify_one();
        let first = in_flight.await.expect("join").expect("first refresh");
        assert_eq!(applied(first).events.len(), 1);
    }

    #[tokio::test]
    async fn stale_response_does_not_overwrite_newer_range() {
        let client = Arc::new(FakeTaskSyncClient::holding_first_call(vec![
            FakeListResponse::Success(vec![remote(
                "june",
                "2024-06-10T09:00:00Z",
                "2024-06-10T10:00:00Z",
            )]),
            FakeListResponse::Success(vec![remote(
                "july",
                "2024-07-10T09:00:00Z",
                "2024-07-10T10:00:00Z",
            )]),
        ]));
        let service = Arc::new(service(Arc::clone(&client)));

        let stale = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.refresh(request(june(), Vec::new())).await })
        };
        while client.calls() < 1 {
            tokio::task::yield_now().await;
        }

        let newer = applied(service.refresh(request(july(), Vec::new())).await.expect("newer"));
        assert_eq!(newer.range, july());

        client.release.notify_one();
        let stale_outcome = stale.await.expect("join").expect("stale refresh");
        assert!(matches!(stale_outcome, RefreshOutcome::Superseded));

        let current = service.snapshot().expect("snapshot").expect("snapshot present");
        assert_eq!(current.range, july());
        assert_eq!(current.events[0].id, "july");
        assert_eq!(service.sync_state().expect("state").status, SyncStatus::Idle);
    }

    #[tokio::test]
    async fn overlapping_tasks_flag_their_day() {
        let client = Arc::new(FakeTaskSyncClient::with_responses(vec![FakeListResponse::Success(
            vec![
                remote("a", "2024-06-10T09:00:00Z", "2024-06-10T10:30:00Z"),
                remote("b", "2024-06-10T10:00:00Z", "2024-06-10T11:00:00Z"),
                remote("c", "2024-06-12T10:00:00Z", "2024-06-12T11:00:00Z"),
            ],
        )]));
        let service = service(client);

        let snapshot = applied(service.refresh(request(june(), Vec::new())).await.expect("refresh"));

        assert!(snapshot.overlaps.is_flagged("a"));
        assert!(snapshot.overlaps.is_flagged("b"));
        assert!(!snapshot.overlaps.is_flagged("c"));
        assert!(snapshot.days[9].has_overlap);
        assert!(!snapshot.days[11].has_overlap);
    }

    #[tokio::test(start_paused = true)]
    async fn poller_refreshes_on_each_tick_until_shutdown() {
        let client = Arc::new(FakeTaskSyncClient::default());
        let service = Arc::new(service(Arc::clone(&client)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let poller = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .run_poller(
                        || request(june(), Vec::new()),
                        TokioDuration::from_secs(30),
                        shutdown_rx,
                    )
                    .await
            })
        };

        sleep(TokioDuration::from_secs(61)).await;
        shutdown_tx.send(true).expect("poller still listening");
        poller.await.expect("join").expect("poller result");

        assert_eq!(client.calls(), 3);
        assert_eq!(service.sync_state().expect("state").status, SyncStatus::Idle);
    }
}
