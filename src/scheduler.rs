//! Dynamic Scheduler (C10, spec §4.7): per-race polling timers that
//! accelerate as each race approaches its start, re-evaluated every 60s.
//!
//! Grounded on the `weather-bingo` poller reference
//! (`other_examples/..._poller.rs.rs`, an `Arc<RwLock<PollerState>>` with a
//! wakeup/re-evaluate loop) and the teacher's own `Arc<RwLock<HashMap<_,_>>>`
//! cache shape (`GameCache`). Race polls and re-evaluation ticks are
//! expressed as `tokio::task`s with `JoinHandle::abort()` standing in for
//! "clear the old timer and schedule anew".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::models::RaceStatus;

#[derive(Debug, Clone)]
pub struct RaceSnapshot {
    pub race_id: String,
    pub start_time: DateTime<Utc>,
    pub status: RaceStatus,
    pub actual_start: Option<DateTime<Utc>>,
}

/// Fetches races whose start time falls in a re-evaluation window.
pub type RaceSourceFn =
    Arc<dyn Fn(DateTime<Utc>, DateTime<Utc>) -> BoxFuture<'static, anyhow::Result<Vec<RaceSnapshot>>> + Send + Sync>;

/// Invoked when a race's timer fires; returns the race's freshly observed
/// status so the scheduler can react to terminal transitions without a
/// second round-trip.
pub type PollFn = Arc<dyn Fn(String, Option<RaceStatus>) -> BoxFuture<'static, Option<RaceStatus>> + Send + Sync>;

const REEVALUATION_TICK: Duration = Duration::from_secs(60);
const WINDOW_BEHIND: chrono::Duration = chrono::Duration::hours(2);
const WINDOW_AHEAD: chrono::Duration = chrono::Duration::hours(4);

struct ScheduleEntry {
    interval_secs: u64,
    handle: JoinHandle<()>,
    start_time: DateTime<Utc>,
    status: RaceStatus,
    polls_executed: Arc<std::sync::atomic::AtomicU64>,
    is_processing: Arc<AtomicBool>,
}

/// Interval policy (spec §4.7 table). Returns 0 to mean "unschedule".
pub fn calculate_polling_interval(seconds_to_start: i64, status: RaceStatus, has_actual_start: bool) -> u64 {
    if seconds_to_start > 1200 {
        return 300;
    }
    if seconds_to_start > 600 {
        return 120;
    }
    if seconds_to_start > 300 {
        return 60;
    }
    if seconds_to_start >= 0 {
        return 15;
    }

    // seconds_to_start < 0: delayed start or live polling, unless terminal.
    let _ = has_actual_start;
    if status.is_terminal() {
        0
    } else {
        15
    }
}

pub struct DynamicScheduler {
    active: Arc<RwLock<HashMap<String, ScheduleEntry>>>,
    race_source: RaceSourceFn,
    poll: PollFn,
    tick_handle: RwLock<Option<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl DynamicScheduler {
    pub fn new(race_source: RaceSourceFn, poll: PollFn) -> Self {
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            race_source,
            poll,
            tick_handle: RwLock::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the 60s re-evaluation loop (spec §4.7 "Model").
    pub async fn start(self: &Arc<Self>) {
        // Run one evaluation immediately so races aren't left unscheduled
        // for up to 60s after startup.
        self.reevaluate().await;

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(REEVALUATION_TICK);
            interval.tick().await; // first tick fires immediately; skip it, we already evaluated
            loop {
                interval.tick().await;
                if this.shutdown.load(Ordering::SeqCst) {
                    return;
                }
                this.reevaluate().await;
            }
        });
        *self.tick_handle.write().await = Some(handle);
    }

    async fn reevaluate(&self) {
        let now = Utc::now();
        let window_start = now - WINDOW_BEHIND;
        let window_end = now + WINDOW_AHEAD;

        let races = match (self.race_source)(window_start, window_end).await {
            Ok(races) => races,
            Err(e) => {
                warn!(error = %e, "failed to fetch races for scheduler re-evaluation");
                return;
            }
        };

        let seen: std::collections::HashSet<String> = races.iter().map(|r| r.race_id.clone()).collect();

        for race in &races {
            if race.status.is_terminal() {
                self.unschedule(&race.race_id, "scheduler_race_completed").await;
                continue;
            }

            let seconds_to_start = (race.start_time - now).num_seconds();
            let interval = calculate_polling_interval(seconds_to_start, race.status, race.actual_start.is_some());

            if interval == 0 {
                self.unschedule(&race.race_id, "scheduler_race_completed").await;
                continue;
            }

            let existing_interval = self.active.read().await.get(&race.race_id).map(|e| e.interval_secs);

            match existing_interval {
                None => self.schedule(race.race_id.clone(), interval, race.start_time, race.status).await,
                Some(current) if current != interval => {
                    info!(race_id = %race.race_id, old_interval = current, new_interval = interval, "scheduler_interval_changed");
                    self.unschedule(&race.race_id, "scheduler_interval_changed").await;
                    self.schedule(race.race_id.clone(), interval, race.start_time, race.status).await;
                }
                _ => {}
            }
        }

        // Races that disappeared from the evaluation window: re-check and
        // unschedule if terminal or missing (spec §4.7).
        let stale: Vec<String> = {
            let active = self.active.read().await;
            active.keys().filter(|id| !seen.contains(*id)).cloned().collect()
        };
        for race_id in stale {
            self.unschedule(&race_id, "scheduler_race_completed").await;
        }
    }

    async fn schedule(&self, race_id: String, interval_secs: u64, start_time: DateTime<Utc>, status: RaceStatus) {
        let is_processing = Arc::new(AtomicBool::new(false));
        let polls_executed = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let poll = self.poll.clone();
        let race_id_for_task = race_id.clone();
        let is_processing_task = is_processing.clone();
        let polls_executed_task = polls_executed.clone();
        let active = self.active.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            ticker.tick().await; // don't fire immediately; wait one full interval
            loop {
                ticker.tick().await;

                if is_processing_task.swap(true, Ordering::SeqCst) {
                    warn!(race_id = %race_id_for_task, "poll_in_flight");
                    continue;
                }

                let current_status = active.read().await.get(&race_id_for_task).map(|e| e.status);
                let observed_status = poll(race_id_for_task.clone(), current_status).await;
                polls_executed_task.fetch_add(1, Ordering::SeqCst);
                is_processing_task.store(false, Ordering::SeqCst);

                if let Some(observed) = observed_status {
                    let mut active = active.write().await;
                    if let Some(entry) = active.get_mut(&race_id_for_task) {
                        entry.status = observed;
                    }
                }
            }
        });

        let entry = ScheduleEntry { interval_secs, handle, start_time, status, polls_executed, is_processing };
        self.active.write().await.insert(race_id, entry);
    }

    async fn unschedule(&self, race_id: &str, reason: &str) {
        let mut active = self.active.write().await;
        if let Some(entry) = active.remove(race_id) {
            entry.handle.abort();
            info!(race_id, reason, "unscheduled race");
        }
    }

    pub async fn active_race_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn is_scheduled(&self, race_id: &str) -> bool {
        self.active.read().await.contains_key(race_id)
    }

    /// `stop()` (spec §4.7 "Cancellation"): clears all timers and the
    /// evaluation tick.
    pub async fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.tick_handle.write().await.take() {
            handle.abort();
        }

        let mut active = self.active.write().await;
        for (_, entry) in active.drain() {
            entry.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_boundaries_match_spec_table() {
        assert_eq!(calculate_polling_interval(3601, RaceStatus::Open, false), 300);
        assert_eq!(calculate_polling_interval(3600, RaceStatus::Open, false), 300);
        assert_eq!(calculate_polling_interval(1201, RaceStatus::Open, false), 300);
        assert_eq!(calculate_polling_interval(1200, RaceStatus::Open, false), 120);
        assert_eq!(calculate_polling_interval(601, RaceStatus::Open, false), 120);
        assert_eq!(calculate_polling_interval(600, RaceStatus::Open, false), 60);
        assert_eq!(calculate_polling_interval(301, RaceStatus::Open, false), 60);
        assert_eq!(calculate_polling_interval(300, RaceStatus::Open, false), 15);
        assert_eq!(calculate_polling_interval(0, RaceStatus::Open, false), 15);
        assert_eq!(calculate_polling_interval(-1, RaceStatus::Open, false), 15);
        assert_eq!(calculate_polling_interval(-1, RaceStatus::Final, false), 0);
        assert_eq!(calculate_polling_interval(-1, RaceStatus::Abandoned, false), 0);
        assert_eq!(calculate_polling_interval(-1, RaceStatus::Closed, false), 0);
    }

    #[test]
    fn delayed_start_polls_at_15s_until_terminal() {
        assert_eq!(calculate_polling_interval(-120, RaceStatus::Open, false), 15);
        assert_eq!(calculate_polling_interval(-120, RaceStatus::Interim, true), 15);
    }

    #[tokio::test]
    async fn unschedules_race_marked_terminal_before_its_start_time() {
        // Abandoned/closed ahead of the scheduled start: seconds_to_start is
        // still non-negative, so calculate_polling_interval alone would keep
        // polling at a normal tier. reevaluate() must unschedule on status
        // terminality regardless of the interval it would otherwise pick.
        let races = vec![
            RaceSnapshot {
                race_id: "r-abandoned".to_string(),
                start_time: Utc::now() + chrono::Duration::seconds(700),
                status: RaceStatus::Abandoned,
                actual_start: None,
            },
            RaceSnapshot {
                race_id: "r-closed".to_string(),
                start_time: Utc::now() + chrono::Duration::seconds(100),
                status: RaceStatus::Closed,
                actual_start: None,
            },
        ];
        let source: RaceSourceFn = Arc::new(move |_s, _e| {
            let races = races.clone();
            Box::pin(async move { Ok(races) })
        });

        let scheduler = Arc::new(DynamicScheduler::new(source, noop_poll()));
        scheduler.reevaluate().await;
        assert!(!scheduler.is_scheduled("r-abandoned").await);
        assert!(!scheduler.is_scheduled("r-closed").await);
        scheduler.stop().await;
    }

    fn empty_source() -> RaceSourceFn {
        Arc::new(|_start, _end| Box::pin(async { Ok(Vec::new()) }))
    }

    fn noop_poll() -> PollFn {
        Arc::new(|_race_id, status| Box::pin(async move { status }))
    }

    #[tokio::test]
    async fn schedules_race_in_open_window() {
        let races = vec![RaceSnapshot {
            race_id: "r1".to_string(),
            start_time: Utc::now() + chrono::Duration::seconds(700),
            status: RaceStatus::Open,
            actual_start: None,
        }];
        let source: RaceSourceFn = Arc::new(move |_s, _e| {
            let races = races.clone();
            Box::pin(async move { Ok(races) })
        });

        let scheduler = Arc::new(DynamicScheduler::new(source, noop_poll()));
        scheduler.reevaluate().await;
        assert!(scheduler.is_scheduled("r1").await);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn unschedules_final_race() {
        let races = vec![RaceSnapshot {
            race_id: "r2".to_string(),
            start_time: Utc::now() - chrono::Duration::seconds(300),
            status: RaceStatus::Final,
            actual_start: Some(Utc::now() - chrono::Duration::seconds(300)),
        }];
        let source: RaceSourceFn = Arc::new(move |_s, _e| {
            let races = races.clone();
            Box::pin(async move { Ok(races) })
        });

        let scheduler = Arc::new(DynamicScheduler::new(source, noop_poll()));
        scheduler.reevaluate().await;
        assert!(!scheduler.is_scheduled("r2").await);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn empty_evaluation_schedules_nothing() {
        let scheduler = Arc::new(DynamicScheduler::new(empty_source(), noop_poll()));
        scheduler.reevaluate().await;
        assert_eq!(scheduler.active_race_count().await, 0);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_clears_all_schedules() {
        let races = vec![RaceSnapshot {
            race_id: "r3".to_string(),
            start_time: Utc::now() + chrono::Duration::seconds(100),
            status: RaceStatus::Open,
            actual_start: None,
        }];
        let source: RaceSourceFn = Arc::new(move |_s, _e| {
            let races = races.clone();
            Box::pin(async move { Ok(races) })
        });

        let scheduler = Arc::new(DynamicScheduler::new(source, noop_poll()));
        scheduler.reevaluate().await;
        assert_eq!(scheduler.active_race_count().await, 1);
        scheduler.stop().await;
        assert_eq!(scheduler.active_race_count().await, 0);
    }
}
