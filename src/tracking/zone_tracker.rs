use crate::common::Point;
use crate::tracking::deduper::SpatialDeduper;
use crate::tracking::zone::{Transition, Zone, ZoneMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

pub type TrackId = i64;

/// One object reported by the external tracker for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub track_id: TrackId,
    pub center: Point,
}

impl TrackedObject {
    pub fn new(track_id: TrackId, x: f32, y: f32) -> Self {
        Self {
            track_id,
            center: Point::new(x, y),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZoneTrackerConfig {
    pub zones: ZoneMap,
    pub entry_cooldown: Duration,
    pub entry_radius: f32,
    pub notify_cooldown: Duration,
    pub empty_frame_threshold: u32,
    pub trail_length: usize,
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone, Default)]
struct TrackState {
    trail: VecDeque<Point>,
    zone: Zone,
}

/// Per-track trails and last-known zones.
#[derive(Debug, Default)]
pub struct ZoneHistory {
    tracks: HashMap<TrackId, TrackState>,
}

impl ZoneHistory {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn zone_of(&self, track_id: TrackId) -> Zone {
        self.tracks
            .get(&track_id)
            .map(|state| state.zone)
            .unwrap_or_default()
    }

    pub fn trail(&self, track_id: TrackId) -> Vec<Point> {
        self.tracks
            .get(&track_id)
            .map(|state| state.trail.iter().copied().collect())
            .unwrap_or_default()
    }

    fn observe(&mut self, track_id: TrackId, center: Point, zone: Zone, trail_length: usize) -> Zone {
        let state = self.tracks.entry(track_id).or_default();
        let previous = state.zone;
        state.zone = zone;
        state.trail.push_back(center);
        while state.trail.len() > trail_length.max(1) {
            state.trail.pop_front();
        }
        previous
    }

    fn retain_active(&mut self, active: &HashSet<TrackId>) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|id, _| active.contains(id));
        before - self.tracks.len()
    }
}

/// Per-object outcome of a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub track_id: TrackId,
    pub center: Point,
    pub previous: Zone,
    pub zone: Zone,
}

#[derive(Debug, Clone, Default)]
pub struct FrameUpdate {
    pub observations: Vec<Observation>,
    /// DOOR -> INSIDE crossings before deduplication.
    pub entry_candidates: Vec<Point>,
    pub entries: Vec<Point>,
    pub exits: Vec<Point>,
    pub inside_now: usize,
    pub door_now: usize,
    /// Set when an accepted entry should fan out a notification.
    pub notify: bool,
    /// Set on the frame where the empty streak reaches the threshold.
    pub became_empty: bool,
}

impl FrameUpdate {
    pub fn detected_in_zones(&self) -> usize {
        self.inside_now + self.door_now
    }
}

/// Turns tracker output into occupancy deltas.
///
/// The "previous occupancy was zero" signal used for notification gating is
/// only trusted after `empty_frame_threshold` consecutive frames without
/// anybody inside, so a single dropped detection does not re-arm alerts.
pub struct ZoneTracker {
    config: ZoneTrackerConfig,
    history: Arc<Mutex<ZoneHistory>>,
    entry_deduper: SpatialDeduper,
    exit_deduper: SpatialDeduper,
    last_notify_at: Option<DateTime<Utc>>,
    last_cleanup_at: Option<DateTime<Utc>>,
    empty_streak: u32,
    previous_inside: usize,
}

impl ZoneTracker {
    pub fn new(config: ZoneTrackerConfig) -> Self {
        let entry_deduper = SpatialDeduper::new(config.entry_cooldown, config.entry_radius);
        let exit_deduper = SpatialDeduper::new(config.entry_cooldown, config.entry_radius);
        Self {
            config,
            history: Arc::new(Mutex::new(ZoneHistory::default())),
            entry_deduper,
            exit_deduper,
            last_notify_at: None,
            last_cleanup_at: None,
            empty_streak: 0,
            previous_inside: 0,
        }
    }

    /// Shared handle for readers that render trails.
    pub fn history(&self) -> Arc<Mutex<ZoneHistory>> {
        Arc::clone(&self.history)
    }

    pub fn trails(&self) -> HashMap<TrackId, Vec<Point>> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history
            .tracks
            .iter()
            .map(|(id, state)| (*id, state.trail.iter().copied().collect()))
            .collect()
    }

    pub fn tracked_count(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn update(&mut self, objects: &[TrackedObject], at: DateTime<Utc>) -> FrameUpdate {
        let mut update = FrameUpdate::default();
        let observations: Vec<Observation> = {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            objects
                .iter()
                .map(|object| {
                    let zone = self.config.zones.classify(object.center);
                    let previous =
                        history.observe(object.track_id, object.center, zone, self.config.trail_length);
                    Observation {
                        track_id: object.track_id,
                        center: object.center,
                        previous,
                        zone,
                    }
                })
                .collect()
        };

        for observation in &observations {
            match observation.zone {
                Zone::Inside => update.inside_now += 1,
                Zone::Door => update.door_now += 1,
                Zone::None => {}
            }
            match Transition::between(observation.previous, observation.zone) {
                Transition::Entry => {
                    update.entry_candidates.push(observation.center);
                    if self.entry_deduper.try_accept(observation.center, at) {
                        debug!(
                            "Entry accepted for track {} at ({:.0}, {:.0})",
                            observation.track_id, observation.center.x, observation.center.y
                        );
                        update.entries.push(observation.center);
                    }
                }
                Transition::Exit => {
                    if self.exit_deduper.try_accept(observation.center, at) {
                        debug!("Exit accepted for track {}", observation.track_id);
                        update.exits.push(observation.center);
                    }
                }
                Transition::Other => {}
            }
        }
        update.observations = observations;

        if !update.entries.is_empty() && self.previous_inside == 0 && self.notify_cooldown_elapsed(at) {
            self.last_notify_at = Some(at);
            update.notify = true;
        }

        if update.inside_now > 0 {
            self.empty_streak = 0;
            self.previous_inside = update.inside_now;
        } else {
            self.empty_streak = self.empty_streak.saturating_add(1);
            if self.empty_streak >= self.config.empty_frame_threshold {
                update.became_empty = self.empty_streak == self.config.empty_frame_threshold.max(1);
                self.previous_inside = 0;
            }
        }

        let active: HashSet<TrackId> = objects.iter().map(|object| object.track_id).collect();
        self.cleanup_stale_tracks(&active, at);
        update
    }

    fn notify_cooldown_elapsed(&self, at: DateTime<Utc>) -> bool {
        match self.last_notify_at {
            None => true,
            Some(last) => (at - last)
                .to_std()
                .map(|elapsed| elapsed > self.config.notify_cooldown)
                .unwrap_or(false),
        }
    }

    fn cleanup_stale_tracks(&mut self, active: &HashSet<TrackId>, at: DateTime<Utc>) {
        let due = match self.last_cleanup_at {
            None => {
                self.last_cleanup_at = Some(at);
                false
            }
            Some(last) => (at - last)
                .to_std()
                .map(|elapsed| elapsed >= self.config.cleanup_interval)
                .unwrap_or(false),
        };
        if !due {
            return;
        }
        self.last_cleanup_at = Some(at);
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let purged = history.retain_active(active);
        if purged > 0 {
            debug!(
                "Purged {} stale tracks, active {}, history size {}",
                purged,
                active.len(),
                history.len()
            );
        }
    }
}
