use crate::domain::models::CanonicalEvent;
use std::collections::HashMap;

/// Reconciles locally held events with a remote snapshot keyed by `id`.
///
/// Local order is preserved and a matching remote event replaces its local
/// counterpart in place, remote fields winning wherever the remote supplies
/// them. Remote events without a local counterpart are appended in the order
/// they arrive. Repeated ids collapse onto their first position.
pub fn merge(local: &[CanonicalEvent], remote: &[CanonicalEvent]) -> Vec<CanonicalEvent> {
    let mut merged: Vec<CanonicalEvent> = Vec::with_capacity(local.len() + remote.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(local.len() + remote.len());

    for event in local.iter().chain(remote) {
        match positions.get(&event.id) {
            Some(&index) => merged[index].overlay(event),
            None => {
                positions.insert(event.id.clone(), merged.len());
                merged.push(event.clone());
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EventCategory, TaskPriority, TaskStatus};
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn event(id: &str, start: &str, end: &str) -> CanonicalEvent {
        CanonicalEvent {
            id: id.to_string(),
            title: format!("Event {id}"),
            start_at: fixed_time(start),
            end_at: fixed_time(end),
            category: EventCategory::Task,
            estimated_hours: None,
            actual_hours: None,
            status: None,
            priority: None,
            confidence_score: None,
        }
    }

    #[test]
    fn remote_wins_on_matching_id() {
        let local = vec![event("1", "2024-06-10T09:00:00Z", "2024-06-10T10:00:00Z")];
        let remote = vec![event("1", "2024-06-10T09:30:00Z", "2024-06-10T11:00:00Z")];

        let merged = merge(&local, &remote);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "1");
        assert_eq!(merged[0].start_at, fixed_time("2024-06-10T09:30:00Z"));
        assert_eq!(merged[0].end_at, fixed_time("2024-06-10T11:00:00Z"));
    }

    #[test]
    fn updated_events_keep_position_and_new_ones_append_in_order() {
        let local = vec![
            event("a", "2024-06-10T09:00:00Z", "2024-06-10T10:00:00Z"),
            event("b", "2024-06-10T11:00:00Z", "2024-06-10T12:00:00Z"),
            event("c", "2024-06-10T13:00:00Z", "2024-06-10T14:00:00Z"),
        ];
        let remote = vec![
            event("z", "2024-06-11T09:00:00Z", "2024-06-11T10:00:00Z"),
            event("b", "2024-06-10T15:00:00Z", "2024-06-10T16:00:00Z"),
            event("y", "2024-06-11T11:00:00Z", "2024-06-11T12:00:00Z"),
        ];

        let merged = merge(&local, &remote);
        let ids: Vec<&str> = merged.iter().map(|event| event.id.as_str()).collect();

        assert_eq!(ids, vec!["a", "b", "c", "z", "y"]);
        assert_eq!(merged[1].start_at, fixed_time("2024-06-10T15:00:00Z"));
    }

    #[test]
    fn local_only_fields_survive_remote_update() {
        let mut local_event = event("1", "2024-06-10T09:00:00Z", "2024-06-10T10:00:00Z");
        local_event.actual_hours = Some(2.5);
        local_event.priority = Some(TaskPriority::Low);
        local_event.confidence_score = Some(0.65);
        let mut remote_event = event("1", "2024-06-10T09:00:00Z", "2024-06-10T10:00:00Z");
        remote_event.status = Some(TaskStatus::Completed);

        let merged = merge(&[local_event], &[remote_event]);

        assert_eq!(merged[0].status, Some(TaskStatus::Completed));
        assert_eq!(merged[0].actual_hours, Some(2.5));
        assert_eq!(merged[0].priority, Some(TaskPriority::Low));
        assert_eq!(merged[0].confidence_score, Some(0.65));
    }

    #[test]
    fn duplicate_ids_never_repeat_in_output() {
        let local = vec![
            event("1", "2024-06-10T09:00:00Z", "2024-06-10T10:00:00Z"),
            event("1", "2024-06-10T12:00:00Z", "2024-06-10T13:00:00Z"),
        ];
        let remote = vec![
            event("2", "2024-06-10T09:00:00Z", "2024-06-10T10:00:00Z"),
            event("2", "2024-06-10T14:00:00Z", "2024-06-10T15:00:00Z"),
        ];

        let merged = merge(&local, &remote);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].start_at, fixed_time("2024-06-10T12:00:00Z"));
        assert_eq!(merged[1].start_at, fixed_time("2024-06-10T14:00:00Z"));
    }

    #[test]
    fn empty_inputs_merge_to_empty() {
        assert!(merge(&[], &[]).is_empty());
    }

    fn arbitrary_event() -> impl Strategy<Value = CanonicalEvent> {
        (
            "[a-e]",
            0i64..(24 * 60 * 14),
            0i64..(24 * 60 * 3),
            proptest::option::of(0.0f64..40.0),
            proptest::option::of(prop_oneof![
                Just(TaskStatus::Pending),
                Just(TaskStatus::InProgress),
                Just(TaskStatus::Completed)
            ]),
        )
            .prop_map(|(id, offset, length, estimated_hours, status)| {
                let start_at = fixed_time("2024-06-01T00:00:00Z") + Duration::minutes(offset);
                CanonicalEvent {
                    id: id.clone(),
                    title: format!("Event {id}"),
                    start_at,
                    end_at: start_at + Duration::minutes(length),
                    category: EventCategory::Task,
                    estimated_hours,
                    actual_hours: None,
                    status,
                    priority: None,
                    confidence_score: None,
                }
            })
    }

    proptest! {
        #[test]
        fn merge_is_idempotent_for_same_remote_snapshot(
            local in proptest::collection::vec(arbitrary_event(), 0..8),
            remote in proptest::collection::vec(arbitrary_event(), 0..8),
        ) {
            let once = merge(&local, &remote);
            let twice = merge(&once, &remote);
            prop_assert_eq!(twice, once);
        }

        #[test]
        fn merge_is_deterministic(
            local in proptest::collection::vec(arbitrary_event(), 0..8),
            remote in proptest::collection::vec(arbitrary_event(), 0..8),
        ) {
            prop_assert_eq!(merge(&local, &remote), merge(&local, &remote));
        }

        #[test]
        fn merge_output_ids_are_unique(
            local in proptest::collection::vec(arbitrary_event(), 0..8),
            remote in proptest::collection::vec(arbitrary_event(), 0..8),
        ) {
            let merged = merge(&local, &remote);
            let mut ids: Vec<&str> = merged.iter().map(|event| event.id.as_str()).collect();
            let total = ids.len();
            ids.sort_unstable();
            ids.dedup();
            prop_assert_eq!(ids.len(), total);
        }
    }
}
