use serde::{Deserialize, Serialize};

use crate::AccountId;

/// One discrete in-match event, e.g. an elimination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_type: String,
    pub time_offset_ms: i64,
    pub actor: Option<AccountId>,
    pub target: Option<AccountId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTimeline(pub Vec<TimelineEvent>);

impl EventTimeline {
    /// Events ordered by time offset; ties keep their original order.
    pub fn ordered(&self) -> Vec<TimelineEvent> {
        let mut events = self.0.clone();
        events.sort_by_key(|e| e.time_offset_ms);
        events
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
