//! Fixed-instant daily scheduler with catch-up.
//!
//! Each wake cycle either fires every slot that is due today and has not run
//! yet (in time-of-day order, followed by a short pause), or sleeps one
//! bounded chunk towards the next slot. Re-evaluating after every chunk is
//! what makes catch-up after a host suspend work: the first cycle after
//! resume sees all missed slots as due.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::Clock;
use crate::config::defaults;
use crate::types::ScheduleSlot;

/// Executes one slot to completion. Must not fail: errors are the
/// runner's to record.
#[async_trait]
pub trait SlotRunner: Send + Sync {
    async fn run_slot(&self, slot: &ScheduleSlot);
}

// ============================================================================
// Daily Run State
// ============================================================================

/// Last calendar date each slot label ran on. Process-scoped.
#[derive(Debug, Clone, Default)]
pub struct DailyRunState {
    last_run: HashMap<String, NaiveDate>,
}

impl DailyRunState {
    pub fn last_run(&self, label: &str) -> Option<NaiveDate> {
        self.last_run.get(label).copied()
    }

    pub fn has_run(&self, label: &str, date: NaiveDate) -> bool {
        self.last_run(label) == Some(date)
    }

    pub fn mark(&mut self, label: &str, date: NaiveDate) {
        self.last_run.insert(label.to_string(), date);
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// What one wake cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    /// These slots fired, in order
    Fired(Vec<String>),
    /// Slept one chunk towards `until`, the next instant of `label`
    Slept { until: NaiveDateTime, label: String },
    /// No slot has a valid time of day
    Idle,
}

pub struct DailyScheduler<C, R> {
    slots: Vec<(ScheduleSlot, NaiveTime)>,
    state: DailyRunState,
    clock: C,
    runner: R,
    sleep_chunk: Duration,
    catch_up_pause: Duration,
    announced: Option<NaiveDateTime>,
}

impl<C: Clock, R: SlotRunner> DailyScheduler<C, R> {
    pub fn new(slots: Vec<ScheduleSlot>, clock: C, runner: R) -> Self {
        let mut slots: Vec<(ScheduleSlot, NaiveTime)> = slots
            .into_iter()
            .filter_map(|slot| match slot.time_of_day() {
                Some(t) => Some((slot, t)),
                None => {
                    warn!(slot = %slot, "Ignoring schedule slot with invalid time");
                    None
                }
            })
            .collect();
        slots.sort_by_key(|(_, t)| *t);

        Self {
            slots,
            state: DailyRunState::default(),
            clock,
            runner,
            sleep_chunk: Duration::from_secs(defaults::SLEEP_CHUNK_SECS),
            catch_up_pause: Duration::from_secs(defaults::CATCH_UP_PAUSE_SECS),
            announced: None,
        }
    }

    pub fn with_sleep_chunk(mut self, chunk: Duration) -> Self {
        self.sleep_chunk = chunk;
        self
    }

    pub fn with_catch_up_pause(mut self, pause: Duration) -> Self {
        self.catch_up_pause = pause;
        self
    }

    pub fn state(&self) -> &DailyRunState {
        &self.state
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Slots due at `now`: instant reached today and not yet run today.
    fn due_slots(&self, now: NaiveDateTime) -> Vec<ScheduleSlot> {
        let today = now.date();
        self.slots
            .iter()
            .filter(|(slot, t)| now.time() >= *t && !self.state.has_run(&slot.label, today))
            .map(|(slot, _)| slot.clone())
            .collect()
    }

    /// Earliest future instant over all slots, with its label.
    fn next_fire(&self, now: NaiveDateTime) -> Option<(NaiveDateTime, &str)> {
        let today = now.date();
        self.slots
            .iter()
            .map(|(slot, t)| {
                let today_at = today.and_time(*t);
                let at = if today_at > now && !self.state.has_run(&slot.label, today) {
                    today_at
                } else {
                    today_at + ChronoDuration::days(1)
                };
                (at, slot.label.as_str())
            })
            .min_by_key(|(at, _)| *at)
    }

    /// One wake cycle.
    pub async fn cycle(&mut self) -> Cycle {
        let now = self.clock.now();
        let today = now.date();

        let due = self.due_slots(now);
        if !due.is_empty() {
            let mut fired = Vec::with_capacity(due.len());
            for slot in &due {
                info!(slot = %slot, "Slot due, running");
                self.state.mark(&slot.label, today);
                self.runner.run_slot(slot).await;
                fired.push(slot.label.clone());
            }
            self.announced = None;
            self.clock.sleep(self.catch_up_pause).await;
            return Cycle::Fired(fired);
        }

        let Some((until, label)) = self.next_fire(now) else {
            return Cycle::Idle;
        };
        let label = label.to_string();

        if self.announced != Some(until) {
            info!(next = %until, label = %label, "Sleeping until next slot");
            self.announced = Some(until);
        }

        let remaining = (until - now).to_std().unwrap_or_default();
        let chunk = remaining.min(self.sleep_chunk);
        debug!(chunk_secs = chunk.as_secs(), "Sleeping");
        // a zero chunk would spin; the instant is reached on the next cycle
        self.clock.sleep(chunk.max(Duration::from_secs(1))).await;

        Cycle::Slept { until, label }
    }

    /// Loop forever.
    pub async fn run(mut self) {
        if self.slots.is_empty() {
            warn!("No valid schedule slots configured, scheduler idle");
        }
        loop {
            if self.cycle().await == Cycle::Idle {
                self.clock.sleep(self.sleep_chunk).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct FakeClock {
        now: Arc<Mutex<NaiveDateTime>>,
        sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    impl FakeClock {
        fn at(s: &str) -> Self {
            Self {
                now: Arc::new(Mutex::new(dt(s))),
                sleeps: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn set(&self, s: &str) {
            *self.now.lock().unwrap() = dt(s);
        }

        fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Clock for FakeClock {
        fn now(&self) -> NaiveDateTime {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            let mut now = self.now.lock().unwrap();
            *now += ChronoDuration::from_std(duration).unwrap();
        }
    }

    #[derive(Clone)]
    struct RecordingRunner {
        clock: FakeClock,
        fired: Arc<Mutex<Vec<(String, NaiveDateTime)>>>,
    }

    #[async_trait]
    impl SlotRunner for RecordingRunner {
        async fn run_slot(&self, slot: &ScheduleSlot) {
            self.fired.lock().unwrap().push((slot.label.clone(), self.clock.now()));
            // a run takes a while
            self.clock.sleep(Duration::from_secs(90)).await;
        }
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn slots() -> Vec<ScheduleSlot> {
        // deliberately out of order
        vec![ScheduleSlot::new("13:30", 13, 30), ScheduleSlot::new("07:00", 7, 0)]
    }

    fn scheduler(start: &str) -> (DailyScheduler<FakeClock, RecordingRunner>, FakeClock, RecordingRunner) {
        let clock = FakeClock::at(start);
        let runner = RecordingRunner {
            clock: clock.clone(),
            fired: Arc::new(Mutex::new(Vec::new())),
        };
        (DailyScheduler::new(slots(), clock.clone(), runner.clone()), clock, runner)
    }

    #[tokio::test]
    async fn test_each_slot_fires_once_per_day() {
        let (mut sched, clock, runner) = scheduler("2025-03-01 06:00:00");
        while clock.now() < dt("2025-03-04 00:00:00") {
            sched.cycle().await;
        }

        let fired = runner.fired.lock().unwrap().clone();
        let labels: Vec<&str> = fired.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["07:00", "13:30", "07:00", "13:30", "07:00", "13:30"]);
        for (label, at) in &fired {
            let slot_time = if label == "07:00" {
                NaiveTime::from_hms_opt(7, 0, 0).unwrap()
            } else {
                NaiveTime::from_hms_opt(13, 30, 0).unwrap()
            };
            // never early, and never more than one chunk late
            assert!(at.time() >= slot_time, "{label} fired early at {at}");
            assert!(*at - at.date().and_time(slot_time) <= ChronoDuration::minutes(5));
        }
        assert!(clock
            .sleeps()
            .iter()
            .all(|d| *d <= Duration::from_secs(defaults::SLEEP_CHUNK_SECS)));
    }

    #[tokio::test]
    async fn test_resume_after_suspend_fires_both_in_order() {
        let (mut sched, clock, runner) = scheduler("2025-03-01 06:59:00");
        assert!(matches!(sched.cycle().await, Cycle::Slept { ref label, .. } if label == "07:00"));

        // host suspended across both instants
        clock.set("2025-03-01 18:00:00");
        let cycle = sched.cycle().await;
        assert_eq!(cycle, Cycle::Fired(vec!["07:00".to_string(), "13:30".to_string()]));
        assert_eq!(runner.fired.lock().unwrap().len(), 2);
        assert_eq!(clock.sleeps().last(), Some(&Duration::from_secs(30)));

        // nothing more today: next target is tomorrow 07:00
        match sched.cycle().await {
            Cycle::Slept { until, label } => {
                assert_eq!(until, dt("2025-03-02 07:00:00"));
                assert_eq!(label, "07:00");
            }
            other => panic!("expected sleep, got {:?}", other),
        }
        assert_eq!(runner.fired.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_start_after_morning_slot_catches_up() {
        let (mut sched, _clock, _runner) = scheduler("2025-03-01 10:00:00");
        assert_eq!(sched.cycle().await, Cycle::Fired(vec!["07:00".to_string()]));
        match sched.cycle().await {
            Cycle::Slept { until, label } => {
                assert_eq!(until, dt("2025-03-01 13:30:00"));
                assert_eq!(label, "13:30");
            }
            other => panic!("expected sleep, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sleep_chunks_are_bounded() {
        let (mut sched, clock, _runner) = scheduler("2025-03-01 00:00:00");
        sched.cycle().await;
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(300)]);
        assert_eq!(clock.now(), dt("2025-03-01 00:05:00"));
    }

    #[tokio::test]
    async fn test_clock_set_back_does_not_refire() {
        let (mut sched, clock, runner) = scheduler("2025-03-01 07:00:00");
        assert_eq!(sched.cycle().await, Cycle::Fired(vec!["07:00".to_string()]));
        clock.set("2025-03-01 06:58:00");
        sched.cycle().await;
        clock.set("2025-03-01 07:01:00");
        sched.cycle().await;
        assert_eq!(runner.fired.lock().unwrap().len(), 1);
        assert_eq!(sched.state().last_run("07:00"), Some(dt("2025-03-01 00:00:00").date()));
    }

    #[test]
    fn test_invalid_slots_ignored() {
        let clock = FakeClock::at("2025-03-01 00:00:00");
        let runner = RecordingRunner {
            clock: clock.clone(),
            fired: Arc::new(Mutex::new(Vec::new())),
        };
        let sched = DailyScheduler::new(vec![ScheduleSlot::new("bad", 25, 0)], clock, runner);
        assert!(sched.slots.is_empty());
    }
}
