use crate::application::overlap::OverlapFlags;
use crate::domain::models::{
    local_day_end, local_day_start, CalendarRange, CanonicalEvent, DayBucket,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct DayBucketBuilder {
    time_zone: Tz,
}

impl Default for DayBucketBuilder {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl DayBucketBuilder {
    pub fn new(time_zone: Tz) -> Self {
        Self { time_zone }
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    /// One bucket per day of `range`, in date order, including empty days.
    pub fn build(
        &self,
        range: &CalendarRange,
        events: &[CanonicalEvent],
        overlap_flags: &OverlapFlags,
    ) -> Vec<DayBucket> {
        let mut ordered: Vec<&CanonicalEvent> = events.iter().collect();
        ordered.sort_by(|left, right| {
            left.start_at
                .cmp(&right.start_at)
                .then_with(|| left.id.cmp(&right.id))
        });

        range
            .days()
            .map(|date| {
                let day_start = local_day_start(date, &self.time_zone);
                let day_end = local_day_end(date, &self.time_zone);
                let day_events: Vec<CanonicalEvent> = ordered
                    .iter()
                    .filter(|event| occupies_day(event, day_start, day_end))
                    .map(|event| (*event).clone())
                    .collect();
                let has_overlap = day_events
                    .iter()
                    .any(|event| overlap_flags.is_flagged(&event.id));

                DayBucket {
                    date,
                    events: day_events,
                    has_overlap,
                }
            })
            .collect()
    }
}

fn occupies_day(event: &CanonicalEvent, day_start: DateTime<Utc>, day_end: DateTime<Utc>) -> bool {
    if event.is_instant() {
        return event.start_at >= day_start && event.start_at < day_end;
    }
    event.start_at < day_end && day_start < event.end_at
}
