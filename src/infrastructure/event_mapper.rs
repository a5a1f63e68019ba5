use crate::domain::models::{
    local_day_start, CanonicalEvent, EventCategory, TaskPriority, TaskStatus,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

const NAIVE_DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Task record as returned by the CalDAV task endpoint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Default)]
pub struct RemoteTaskRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Task held by the dashboard before it has been synced anywhere.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct LocalTaskRecord {
    pub id: i64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub category: EventCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskRecord {
    Local(LocalTaskRecord),
    Remote(RemoteTaskRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    pub record_id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub events: Vec<CanonicalEvent>,
    pub dropped: Vec<DroppedRecord>,
    pub clamped: usize,
}

impl NormalizedBatch {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

/// Placement used for local tasks that have not been scheduled yet:
/// they start now and last for their estimate.
#[derive(Clone)]
pub struct DefaultSchedulePolicy {
    now_provider: NowProvider,
}

impl DefaultSchedulePolicy {
    pub fn new(now_provider: NowProvider) -> Self {
        Self { now_provider }
    }

    pub fn resolve(
        &self,
        start_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
        estimated_hours: Option<f64>,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = start_at.unwrap_or_else(|| (self.now_provider)());
        let end = end_at.unwrap_or_else(|| {
            estimate_duration(estimated_hours)
                .and_then(|duration| start.checked_add_signed(duration))
                .unwrap_or_else(|| {
                    tracing::debug!(
                        estimated_hours = ?estimated_hours,
                        "estimate exceeds the calendar range, scheduling as an instant"
                    );
                    start
                })
        });
        (start, end)
    }
}

impl Default for DefaultSchedulePolicy {
    fn default() -> Self {
        Self::new(Arc::new(Utc::now))
    }
}

impl std::fmt::Debug for DefaultSchedulePolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("DefaultSchedulePolicy").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct EventNormalizer {
    time_zone: Tz,
    schedule_policy: DefaultSchedulePolicy,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new(Tz::UTC, DefaultSchedulePolicy::default())
    }
}

impl EventNormalizer {
    pub fn new(time_zone: Tz, schedule_policy: DefaultSchedulePolicy) -> Self {
        Self {
            time_zone,
            schedule_policy,
        }
    }

    pub fn normalize(&self, record: &TaskRecord) -> Result<CanonicalEvent, DroppedRecord> {
        match record {
            TaskRecord::Local(local) => Ok(self.normalize_local(local)),
            TaskRecord::Remote(remote) => self.normalize_remote(remote),
        }
    }

    pub fn normalize_all<'a, I>(&self, records: I) -> NormalizedBatch
    where
        I: IntoIterator<Item = &'a TaskRecord>,
    {
        let mut batch = NormalizedBatch::default();
        for record in records {
            match self.normalize(record) {
                Ok(event) => batch.push(event),
                Err(dropped) => {
                    tracing::debug!(
                        record_id = dropped.record_id.as_deref().unwrap_or("<missing>"),
                        reason = %dropped.reason,
                        "dropping malformed task record"
                    );
                    batch.dropped.push(dropped);
                }
            }
        }
        batch
    }

    pub fn normalize_local(&self, record: &LocalTaskRecord) -> CanonicalEvent {
        let (start_at, end_at) =
            self.schedule_policy
                .resolve(record.start_at, record.end_at, record.estimated_hours);
        let title = record
            .title
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| record.description.trim())
            .to_string();

        CanonicalEvent {
            id: record.id.to_string(),
            title,
            start_at,
            end_at,
            category: record.category,
            estimated_hours: record.estimated_hours,
            actual_hours: record.actual_hours,
            status: record.status,
            priority: record.priority,
            confidence_score: record.confidence_score,
        }
    }

    pub fn normalize_remote(&self, record: &RemoteTaskRecord) -> Result<CanonicalEvent, DroppedRecord> {
        let record_id = record
            .uid
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned);
        let Some(id) = record_id.clone() else {
            return Err(DroppedRecord {
                record_id: None,
                reason: "missing uid".to_string(),
            });
        };
        let drop_with = |reason: String| DroppedRecord {
            record_id: record_id.clone(),
            reason,
        };

        let description = record
            .description
            .as_deref()
            .ok_or_else(|| drop_with("missing description".to_string()))?;
        let raw_start = record
            .start_date
            .as_deref()
            .ok_or_else(|| drop_with("missing start_date".to_string()))?;
        let raw_end = record
            .end_date
            .as_deref()
            .ok_or_else(|| drop_with("missing end_date".to_string()))?;
        let start_at = self
            .parse_instant(raw_start)
            .ok_or_else(|| drop_with(format!("invalid start_date '{raw_start}'")))?;
        let end_at = self
            .parse_instant(raw_end)
            .ok_or_else(|| drop_with(format!("invalid end_date '{raw_end}'")))?;

        let status = record.status.as_deref().and_then(|value| {
            let parsed = TaskStatus::parse(value);
            if parsed.is_none() {
                tracing::debug!(record_id = %id, status = value, "ignoring unknown task status");
            }
            parsed
        });
        let priority = record.priority.as_deref().and_then(|value| {
            let parsed = TaskPriority::parse(value);
            if parsed.is_none() {
                tracing::debug!(record_id = %id, priority = value, "ignoring unknown task priority");
            }
            parsed
        });

        Ok(CanonicalEvent {
            id,
            title: description.trim().to_string(),
            start_at,
            end_at,
            category: EventCategory::Task,
            estimated_hours: record.estimated_hours,
            actual_hours: None,
            status,
            priority,
            confidence_score: None,
        })
    }

    /// RFC 3339, or a naive date-time/date read in the configured time zone.
    pub fn parse_instant(&self, value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Some(parsed.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, NAIVE_DATE_TIME_FORMAT) {
            return self.local_to_utc(naive);
        }
        if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
            return Some(local_day_start(date, &self.time_zone));
        }
        None
    }

    fn local_to_utc(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.time_zone
            .from_local_datetime(&naive)
            .earliest()
            .map(|value| value.with_timezone(&Utc))
    }
}

impl NormalizedBatch {
    fn push(&mut self, mut event: CanonicalEvent) {
        if event.end_at < event.start_at {
            tracing::debug!(record_id = %event.id, "clamping reversed interval to an instant");
            event.end_at = event.start_at;
            self.clamped += 1;
        }
        self.events.push(event);
    }
}

/// `None` when the estimate does not fit in a `Duration`.
fn estimate_duration(estimated_hours: Option<f64>) -> Option<Duration> {
    let hours = estimated_hours
        .filter(|hours| hours.is_finite() && *hours > 0.0)
        .unwrap_or(0.0);
    let seconds = (hours * 3600.0).round();
    if seconds >= i64::MAX as f64 {
        return None;
    }
    Duration::try_seconds(seconds as i64)
}
