use chrono::{
    DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.8;
const MEDIUM_CONFIDENCE_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    #[default]
    Task,
    Meeting,
    Deadline,
}

impl EventCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Meeting => "meeting",
            Self::Deadline => "deadline",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_CONFIDENCE_THRESHOLD {
            Self::High
        } else if score >= MEDIUM_CONFIDENCE_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Normalized task or calendar item shared by every reconciliation stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalEvent {
    pub id: String,
    pub title: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub category: EventCategory,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub confidence_score: Option<f64>,
}

impl CanonicalEvent {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "event.id")?;
        if self.end_at < self.start_at {
            return Err("event.end_at must be >= event.start_at".to_string());
        }
        Ok(())
    }

    pub fn is_instant(&self) -> bool {
        self.start_at == self.end_at
    }

    /// Applies `other` on top of `self`; optional fields only overwrite when present.
    pub fn overlay(&mut self, other: &CanonicalEvent) {
        self.id = other.id.clone();
        self.title = other.title.clone();
        self.start_at = other.start_at;
        self.end_at = other.end_at;
        self.category = other.category;
        if other.estimated_hours.is_some() {
            self.estimated_hours = other.estimated_hours;
        }
        if other.actual_hours.is_some() {
            self.actual_hours = other.actual_hours;
        }
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.priority.is_some() {
            self.priority = other.priority;
        }
        if other.confidence_score.is_some() {
            self.confidence_score = other.confidence_score;
        }
    }

    pub fn confidence_band(&self) -> Option<ConfidenceBand> {
        self.confidence_score.map(ConfidenceBand::from_score)
    }

    /// Percentage of the estimate already booked as actual hours.
    pub fn hours_progress(&self) -> Option<f64> {
        if self.category != EventCategory::Task {
            return None;
        }
        let estimated = self.estimated_hours.filter(|hours| *hours > 0.0)?;
        let actual = self.actual_hours.unwrap_or(0.0).max(0.0);
        Some((actual / estimated * 100.0).clamp(0.0, 100.0))
    }
}

/// Inclusive span of calendar days.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CalendarRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CalendarRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if end < start {
            return Err(format!("range end {end} is before range start {start}"));
        }
        if end.succ_opt().is_none() {
            return Err(format!("range end {end} is the last supported date"));
        }
        Ok(Self { start, end })
    }

    pub fn month(year: i32, month: u32) -> Result<Self, String> {
        let first = first_of_month(year, month)?;
        let last = last_of_month(first)?;
        Self::new(first, last)
    }

    /// Month padded to whole weeks beginning on `week_start`.
    pub fn month_grid(year: i32, month: u32, week_start: Weekday) -> Result<Self, String> {
        let days = Self::month(year, month)?;
        let lead = days_between(week_start, days.start.weekday());
        let week_end = week_start.pred();
        let trail = days_between(days.end.weekday(), week_end);
        let start = days
            .start
            .checked_sub_days(Days::new(lead))
            .ok_or_else(|| format!("month grid of {year}-{month:02} starts before the supported range"))?;
        let end = days
            .end
            .checked_add_days(Days::new(trail))
            .ok_or_else(|| format!("month grid of {year}-{month:02} ends after the supported range"))?;
        Self::new(start, end)
    }

    pub fn len_days(&self) -> usize {
        ((self.end - self.start).num_days() + 1) as usize
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        std::iter::successors(Some(self.start), |day| day.succ_opt()).take(self.len_days())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// `[start 00:00, day after end 00:00)` in `time_zone`, expressed in UTC.
    pub fn utc_window(&self, time_zone: &Tz) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            local_day_start(self.start, time_zone),
            local_day_end(self.end, time_zone),
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub events: Vec<CanonicalEvent>,
    pub has_overlap: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Start of `date` in `time_zone`; a midnight that falls in a DST gap moves to the first valid hour.
pub fn local_day_start(date: NaiveDate, time_zone: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    time_zone
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            midnight
                .checked_add_signed(Duration::hours(1))
                .and_then(|later| time_zone.from_local_datetime(&later).earliest())
        })
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

/// Start of the day after `date`, or the latest representable instant on the last supported day.
pub fn local_day_end(date: NaiveDate, time_zone: &Tz) -> DateTime<Utc> {
    date.succ_opt()
        .map_or(DateTime::<Utc>::MAX_UTC, |next| local_day_start(next, time_zone))
}

pub fn parse_weekday(value: &str) -> Option<Weekday> {
    value.trim().parse::<Weekday>().ok()
}

fn days_between(from: Weekday, to: Weekday) -> u64 {
    u64::from((to.num_days_from_monday() + 7 - from.num_days_from_monday()) % 7)
}

fn first_of_month(year: i32, month: u32) -> Result<NaiveDate, String> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| format!("invalid calendar month {year}-{month:02}"))
}

fn last_of_month(first: NaiveDate) -> Result<NaiveDate, String> {
    let (year, month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    first_of_month(year, month)?
        .pred_opt()
        .ok_or_else(|| format!("no last day for month starting {first}"))
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
