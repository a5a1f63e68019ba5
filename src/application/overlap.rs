use crate::domain::models::CanonicalEvent;
use std::collections::HashMap;

/// Per-event flag telling whether the event intersects any other event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlapFlags {
    flags: HashMap<String, bool>,
}

impl OverlapFlags {
    pub fn is_flagged(&self, event_id: &str) -> bool {
        self.flags.get(event_id).copied().unwrap_or(false)
    }

    pub fn get(&self, event_id: &str) -> Option<bool> {
        self.flags.get(event_id).copied()
    }

    pub fn flagged_count(&self) -> usize {
        self.flags.values().filter(|flag| **flag).count()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl FromIterator<(String, bool)> for OverlapFlags {
    fn from_iter<T: IntoIterator<Item = (String, bool)>>(iter: T) -> Self {
        Self {
            flags: iter.into_iter().collect(),
        }
    }
}

/// Half-open interval intersection. Touching endpoints and instants never overlap.
pub fn intervals_overlap(left: &CanonicalEvent, right: &CanonicalEvent) -> bool {
    if left.id == right.id || left.is_instant() || right.is_instant() {
        return false;
    }
    left.start_at < right.end_at && right.start_at < left.end_at
}

pub fn annotate_overlaps(events: &[CanonicalEvent]) -> OverlapFlags {
    let mut flags: HashMap<String, bool> = events
        .iter()
        .map(|event| (event.id.clone(), false))
        .collect();

    let mut order: Vec<&CanonicalEvent> = events.iter().collect();
    order.sort_by(|left, right| {
        left.start_at
            .cmp(&right.start_at)
            .then_with(|| left.id.cmp(&right.id))
    });

    for (index, current) in order.iter().enumerate() {
        for candidate in &order[index + 1..] {
            // sorted by start, nothing later can reach back into `current`
            if candidate.start_at >= current.end_at {
                break;
            }
            if intervals_overlap(current, candidate) {
                flags.insert(current.id.clone(), true);
                flags.insert(candidate.id.clone(), true);
            }
        }
    }

    OverlapFlags { flags }
}
