use crate::common::Point;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryRecord {
    pub position: Point,
    pub at: DateTime<Utc>,
}

/// Suppresses repeated crossings reported by flickering track ids.
///
/// A candidate is rejected when an accepted crossing lies within `radius`
/// pixels and `cooldown` of it. Identity plays no part in the decision.
#[derive(Debug, Clone)]
pub struct SpatialDeduper {
    cooldown: Duration,
    radius: f32,
    recent: Vec<EntryRecord>,
}

impl SpatialDeduper {
    pub fn new(cooldown: Duration, radius: f32) -> Self {
        Self {
            cooldown,
            radius,
            recent: Vec::new(),
        }
    }

    pub fn try_accept(&mut self, position: Point, at: DateTime<Utc>) -> bool {
        self.prune(at);
        if self
            .recent
            .iter()
            .any(|record| record.position.distance(&position) < self.radius)
        {
            return false;
        }
        self.recent.push(EntryRecord { position, at });
        true
    }

    pub fn recent(&self) -> &[EntryRecord] {
        &self.recent
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cooldown = self.cooldown;
        self.recent.retain(|record| {
            (now - record.at)
                .to_std()
                .map(|elapsed| elapsed < cooldown)
                // record in the future relative to `now`: keep it
                .unwrap_or(true)
        });
    }
}
