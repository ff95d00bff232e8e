use crate::occupancy::sink::VisitSink;
use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

pub const DEFAULT_ENTRY_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct OccupancyState {
    pub system_alerts_enabled: bool,
    pub inside_count: u32,
    pub today_visits: u32,
    pub last_entry_ts: Option<DateTime<Local>>,
    pub entry_log: VecDeque<DateTime<Local>>,
    #[serde(skip)]
    current_date: NaiveDate,
    #[serde(skip)]
    entry_log_capacity: usize,
}

impl OccupancyState {
    fn new(entry_log_capacity: usize, today: NaiveDate) -> Self {
        Self {
            system_alerts_enabled: true,
            inside_count: 0,
            today_visits: 0,
            last_entry_ts: None,
            entry_log: VecDeque::with_capacity(entry_log_capacity),
            current_date: today,
            entry_log_capacity: entry_log_capacity.max(1),
        }
    }

    fn record_entry(&mut self, now: DateTime<Local>) {
        let today = now.date_naive();
        if today != self.current_date {
            debug!("Date rolled over to {}, resetting daily visits", today);
            self.today_visits = 0;
            self.current_date = today;
        }
        self.today_visits = self.today_visits.saturating_add(1);
        self.inside_count = self.inside_count.saturating_add(1);
        self.last_entry_ts = Some(now);
        if self.entry_log.len() == self.entry_log_capacity {
            self.entry_log.pop_front();
        }
        self.entry_log.push_back(now);
    }

    fn exit_one(&mut self) {
        self.inside_count = self.inside_count.saturating_sub(1);
    }

    pub fn had_visitor_within(&self, window: Duration, now: DateTime<Local>) -> bool {
        self.entry_log.iter().rev().any(|t| {
            (now - *t)
                .to_std()
                .map(|elapsed| elapsed <= window)
                .unwrap_or(true)
        })
    }
}

/// Shared occupancy counters.
///
/// Every mutation takes the single state mutex for the in-memory update only;
/// forwarding to the durable sink happens after the guard is dropped, on a
/// spawned task, and never rolls back the counters.
pub struct OccupancyStore {
    state: Mutex<OccupancyState>,
    sink: Option<Arc<dyn VisitSink>>,
    runtime: Option<Handle>,
}

impl OccupancyStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ENTRY_LOG_CAPACITY)
    }

    pub fn with_capacity(entry_log_capacity: usize) -> Self {
        Self {
            state: Mutex::new(OccupancyState::new(entry_log_capacity, Local::now().date_naive())),
            sink: None,
            runtime: None,
        }
    }

    /// Attaches a durable sink. Must be called from within a tokio runtime,
    /// whose handle is used to run sink writes.
    pub fn with_sink(mut self, sink: Arc<dyn VisitSink>) -> Self {
        match Handle::try_current() {
            Ok(handle) => {
                self.runtime = Some(handle);
                self.sink = Some(sink);
            }
            Err(e) => warn!("No tokio runtime, visit log disabled: {}", e),
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, OccupancyState> {
        // counters stay consistent even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_entry(&self) {
        self.record_entry_at(Local::now());
    }

    pub fn record_entry_at(&self, now: DateTime<Local>) {
        self.lock().record_entry(now);
        self.forward(now);
    }

    pub fn exit_one(&self) {
        self.lock().exit_one();
    }

    /// Sets occupancy to zero once the room has been seen empty long enough.
    pub fn clear_inside(&self) {
        let mut state = self.lock();
        if state.inside_count > 0 {
            debug!("Reconciling occupancy {} -> 0", state.inside_count);
            state.inside_count = 0;
        }
    }

    pub fn set_system_alerts(&self, enabled: bool) {
        self.lock().system_alerts_enabled = enabled;
    }

    pub fn system_alerts_enabled(&self) -> bool {
        self.lock().system_alerts_enabled
    }

    pub fn snapshot(&self) -> OccupancyState {
        self.lock().clone()
    }

    fn forward(&self, at: DateTime<Local>) {
        let (Some(sink), Some(runtime)) = (&self.sink, &self.runtime) else {
            return;
        };
        let sink = Arc::clone(sink);
        runtime.spawn(async move {
            match sink.record_entry(at).await {
                Ok(id) => debug!("Visit {} persisted", id),
                Err(e) => warn!("Failed to persist visit at {}: {}", at, e),
            }
        });
    }
}

impl Default for OccupancyStore {
    fn default() -> Self {
        Self::new()
    }
}
