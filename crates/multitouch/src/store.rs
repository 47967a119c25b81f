//! Journey and conversion store.

use crate::types::{Conversion, Engagement, Journey, Touchpoint};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evicted {
    pub journeys: usize,
    pub conversions: usize,
    /// Conversions dropped from the export queue before they were sent.
    pub queued: usize,
}

/// Per-visitor journeys plus the permanent conversion log.
///
/// Every operation on one user id holds that key's map entry for its whole
/// duration, so appends and engagement updates for a visitor never
/// interleave. Distinct visitors only contend when they hash to the same
/// shard.
#[derive(Debug, Default)]
pub struct JourneyStore {
    journeys: DashMap<String, Journey>,
    conversions: DashMap<Uuid, Conversion>,
}

impl JourneyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the visitor's journey, creating an empty one if none exists.
    ///
    /// Returns `None` for a blank user id.
    pub fn get_or_create_journey(&self, user_id: &str) -> Option<Journey> {
        if user_id.trim().is_empty() {
            return None;
        }
        let entry = self
            .journeys
            .entry(user_id.to_string())
            .or_insert_with(|| Journey::new(user_id));
        Some(entry.clone())
    }

    /// Append a touchpoint to the visitor's journey, creating it if needed.
    ///
    /// A timestamp earlier than the journey's last touchpoint is clamped up
    /// to it, so the sequence stays chronological. Returns the touchpoint as
    /// stored, or `None` for a blank user id.
    pub fn add_touchpoint(&self, user_id: &str, mut touchpoint: Touchpoint) -> Option<Touchpoint> {
        if user_id.trim().is_empty() {
            warn!("dropping touchpoint without user id");
            return None;
        }

        let mut journey = self
            .journeys
            .entry(user_id.to_string())
            .or_insert_with(|| Journey::new(user_id));

        if let Some(last) = journey.touchpoints.last() {
            if touchpoint.timestamp < last.timestamp {
                warn!(
                    user_id = %user_id,
                    touchpoint_id = %touchpoint.id,
                    "clamping out-of-order touchpoint timestamp"
                );
                touchpoint.timestamp = last.timestamp;
            }
        }

        debug!(
            user_id = %user_id,
            channel = touchpoint.channel.as_str(),
            source = %touchpoint.source,
            count = journey.touchpoints.len() + 1,
            "touchpoint added"
        );

        journey.touchpoints.push(touchpoint.clone());
        Some(touchpoint)
    }

    /// Apply engagement metrics to the visitor's most recent touchpoint.
    ///
    /// No-op (returns `false`) when the visitor has no journey or no
    /// touchpoints yet.
    pub fn update_last_touchpoint(&self, user_id: &str, engagement: &Engagement) -> bool {
        let Some(mut journey) = self.journeys.get_mut(user_id) else {
            debug!(user_id = %user_id, "engagement update for unknown visitor ignored");
            return false;
        };
        match journey.touchpoints.last_mut() {
            Some(last) => {
                last.apply_engagement(engagement);
                true
            }
            None => false,
        }
    }

    /// Run `f` with exclusive access to the visitor's journey, creating it if
    /// needed. Used to build a conversion atomically with respect to appends.
    pub(crate) fn with_journey_mut<R>(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut Journey) -> R,
    ) -> Option<R> {
        if user_id.trim().is_empty() {
            return None;
        }
        let mut journey = self
            .journeys
            .entry(user_id.to_string())
            .or_insert_with(|| Journey::new(user_id));
        Some(f(&mut journey))
    }

    /// Store a conversion and mark its visitor's journey as converted.
    pub fn record_conversion(&self, conversion: Conversion) {
        if let Some(mut journey) = self.journeys.get_mut(&conversion.user_id) {
            journey.converted = true;
        }
        self.conversions.insert(conversion.id, conversion);
    }

    /// Snapshot of one visitor's journey.
    pub fn journey(&self, user_id: &str) -> Option<Journey> {
        self.journeys.get(user_id).map(|j| j.clone())
    }

    /// Snapshot of every journey.
    pub fn journeys(&self) -> Vec<Journey> {
        self.journeys.iter().map(|j| j.value().clone()).collect()
    }

    /// Every stored touchpoint across all journeys.
    pub fn all_touchpoints(&self) -> Vec<Touchpoint> {
        self.journeys
            .iter()
            .flat_map(|j| j.value().touchpoints.clone())
            .collect()
    }

    /// Snapshot of every conversion, oldest first.
    pub fn conversions(&self) -> Vec<Conversion> {
        let mut conversions: Vec<Conversion> =
            self.conversions.iter().map(|c| c.value().clone()).collect();
        conversions.sort_by_key(|c| c.timestamp);
        conversions
    }

    pub fn conversion(&self, id: &Uuid) -> Option<Conversion> {
        self.conversions.get(id).map(|c| c.clone())
    }

    /// Number of journeys.
    pub fn len(&self) -> usize {
        self.journeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journeys.is_empty()
    }

    pub fn conversion_count(&self) -> usize {
        self.conversions.len()
    }

    /// Drop journeys idle since before `now - retention` and conversions
    /// recorded before it.
    pub fn evict_expired(&self, retention: Duration, now: DateTime<Utc>) -> Evicted {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return Evicted::default();
        };
        let cutoff = now - retention;

        let journeys_before = self.journeys.len();
        self.journeys.retain(|_, j| j.last_activity() >= cutoff);
        let conversions_before = self.conversions.len();
        self.conversions.retain(|_, c| c.timestamp >= cutoff);

        Evicted {
            journeys: journeys_before.saturating_sub(self.journeys.len()),
            conversions: conversions_before.saturating_sub(self.conversions.len()),
            queued: 0,
        }
    }
}
