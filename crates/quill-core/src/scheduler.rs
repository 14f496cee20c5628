//! Sync scheduling with debounce.
//!
//! Provides:
//! - `SyncScheduler` - explicit state machine turning edit bursts into rounds
//!
//! Every event (edit, timer fire, round completion) has a defined transition,
//! so there is no separate cancel/re-arm timer bookkeeping to race against.

use std::time::Duration;

use tokio::time::Instant;

/// Default debounce delay between the last edit and the outgoing round.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(275);

/// Scheduling state of the single logical sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    /// Nothing queued
    Idle,
    /// A round fires at `deadline` unless another edit pushes it back
    Pending { deadline: Instant },
    /// A round is in flight
    InFlight,
    /// A round is in flight and another is queued behind it
    PendingWhileInFlight { deadline: Instant },
}

/// Manages sync scheduling with debounce.
///
/// When a mutation occurs, a round is scheduled after the debounce delay. If
/// another mutation occurs before the deadline, the deadline moves. Mutations
/// arriving while a round is in flight are queued for the next round.
#[derive(Debug)]
pub struct SyncScheduler {
    state: ScheduleState,
    debounce: Duration,
    retry_after: Option<Duration>,
    interval: Option<Duration>,
    periodic_paused: bool,
    idle_since: Instant,
}

impl SyncScheduler {
    /// Create a scheduler with the default debounce and no timers.
    pub fn new(now: Instant) -> Self {
        Self {
            state: ScheduleState::Idle,
            debounce: DEFAULT_DEBOUNCE,
            retry_after: None,
            interval: None,
            periodic_paused: false,
            idle_since: now,
        }
    }

    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Retry a failed round after `delay` even without new edits
    #[must_use]
    pub const fn with_retry_after(mut self, delay: Option<Duration>) -> Self {
        self.retry_after = delay;
        self
    }

    /// Run a retrieval round every `interval` while idle
    #[must_use]
    pub const fn with_interval(mut self, interval: Option<Duration>) -> Self {
        self.interval = interval;
        self
    }

    pub const fn state(&self) -> ScheduleState {
        self.state
    }

    pub const fn is_in_flight(&self) -> bool {
        matches!(
            self.state,
            ScheduleState::InFlight | ScheduleState::PendingWhileInFlight { .. }
        )
    }

    /// A local change happened: (re)start the debounce window.
    pub fn note_changed(&mut self, now: Instant) {
        self.queue(now + self.debounce);
    }

    /// Ask for a round as soon as possible (explicit sync, backgrounding).
    pub fn request_now(&mut self, now: Instant) {
        self.queue(now);
    }

    fn queue(&mut self, deadline: Instant) {
        self.state = match self.state {
            ScheduleState::Idle | ScheduleState::Pending { .. } => {
                ScheduleState::Pending { deadline }
            }
            ScheduleState::InFlight | ScheduleState::PendingWhileInFlight { .. } => {
                ScheduleState::PendingWhileInFlight { deadline }
            }
        };
        tracing::debug!(state = ?self.state, "Sync scheduled");
    }

    /// When the worker should next call [`Self::fire`]; `None` means wait for an event.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            ScheduleState::Pending { deadline } => Some(deadline),
            ScheduleState::Idle => self.periodic_deadline(),
            ScheduleState::InFlight | ScheduleState::PendingWhileInFlight { .. } => None,
        }
    }

    fn periodic_deadline(&self) -> Option<Instant> {
        if self.periodic_paused {
            return None;
        }
        self.interval.map(|interval| self.idle_since + interval)
    }

    /// Timer fired: start a round if one is due.
    ///
    /// Returns true when the caller now owns the in-flight round.
    pub fn fire(&mut self, now: Instant) -> bool {
        let due = self.next_deadline().is_some_and(|deadline| deadline <= now);
        if due {
            self.state = ScheduleState::InFlight;
        }
        due
    }

    /// Start a round immediately unless one is already in flight.
    ///
    /// When a round is in flight the request is queued behind it instead.
    pub fn fire_now(&mut self, now: Instant) -> bool {
        if self.is_in_flight() {
            self.request_now(now);
            return false;
        }
        self.state = ScheduleState::InFlight;
        true
    }

    /// The in-flight round finished.
    pub fn round_completed(&mut self, now: Instant, succeeded: bool) {
        self.idle_since = now;
        self.state = match self.state {
            ScheduleState::PendingWhileInFlight { deadline } => {
                ScheduleState::Pending { deadline }
            }
            _ if !succeeded => self
                .retry_after
                .map_or(ScheduleState::Idle, |delay| ScheduleState::Pending {
                    deadline: now + delay,
                }),
            _ => ScheduleState::Idle,
        };
        tracing::debug!(state = ?self.state, succeeded, "Sync round completed");
    }

    /// The in-flight round was abandoned before reaching the network.
    ///
    /// Unlike a failed round, nothing is retried until the next edit.
    pub fn round_aborted(&mut self, now: Instant) {
        self.idle_since = now;
        self.state = match self.state {
            ScheduleState::PendingWhileInFlight { deadline } => {
                ScheduleState::Pending { deadline }
            }
            _ => ScheduleState::Idle,
        };
    }

    /// Stop periodic retrieval rounds (edits are still scheduled)
    pub fn pause_periodic(&mut self) {
        self.periodic_paused = true;
    }

    pub fn resume_periodic(&mut self, now: Instant) {
        if self.periodic_paused {
            self.periodic_paused = false;
            self.idle_since = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn edits_within_window_push_the_deadline() {
        let start = Instant::now();
        let mut scheduler = SyncScheduler::new(start);

        scheduler.note_changed(start);
        scheduler.note_changed(start + ms(100));

        assert!(!scheduler.fire(start + ms(300)));
        assert_eq!(scheduler.next_deadline(), Some(start + ms(375)));
        assert!(scheduler.fire(start + ms(375)));
        assert_eq!(scheduler.state(), ScheduleState::InFlight);
    }

    #[test]
    fn edits_during_flight_queue_behind_the_round() {
        let start = Instant::now();
        let mut scheduler = SyncScheduler::new(start);
        scheduler.note_changed(start);
        assert!(scheduler.fire(start + DEFAULT_DEBOUNCE));

        scheduler.note_changed(start + ms(400));
        assert!(matches!(
            scheduler.state(),
            ScheduleState::PendingWhileInFlight { .. }
        ));
        assert_eq!(scheduler.next_deadline(), None);
        assert!(!scheduler.fire_now(start + ms(450)));

        scheduler.round_completed(start + ms(500), true);
        assert_eq!(
            scheduler.state(),
            ScheduleState::Pending {
                deadline: start + ms(450)
            }
        );
    }

    #[test]
    fn failed_round_retries_after_delay() {
        let start = Instant::now();
        let mut scheduler = SyncScheduler::new(start).with_retry_after(Some(ms(30_000)));
        assert!(scheduler.fire_now(start));

        scheduler.round_completed(start + ms(10), false);
        assert_eq!(scheduler.next_deadline(), Some(start + ms(30_010)));
    }

    #[test]
    fn failed_round_without_retry_waits_for_next_edit() {
        let start = Instant::now();
        let mut scheduler = SyncScheduler::new(start);
        assert!(scheduler.fire_now(start));
        scheduler.round_completed(start, false);
        assert_eq!(scheduler.state(), ScheduleState::Idle);
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn periodic_rounds_fire_while_idle_and_can_pause() {
        let start = Instant::now();
        let mut scheduler = SyncScheduler::new(start).with_interval(Some(ms(1_000)));
        assert_eq!(scheduler.next_deadline(), Some(start + ms(1_000)));

        scheduler.pause_periodic();
        assert_eq!(scheduler.next_deadline(), None);
        assert!(!scheduler.fire(start + ms(5_000)));

        scheduler.resume_periodic(start + ms(5_000));
        assert!(scheduler.fire(start + ms(6_000)));
    }

    #[test]
    fn aborted_round_goes_idle() {
        let start = Instant::now();
        let mut scheduler = SyncScheduler::new(start).with_retry_after(Some(ms(10)));
        assert!(scheduler.fire_now(start));
        scheduler.round_aborted(start);
        assert_eq!(scheduler.state(), ScheduleState::Idle);
    }
}
