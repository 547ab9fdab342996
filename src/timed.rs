//! Timed-event list driven by the scheduling queue.
//!
//! Every add, removal and execution is reported to the broker's
//! timed-event slot. Recurring events are put back at
//! `run_time + interval` after they run.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::events::{NEBTYPE_TIMEDEVENT_ADD, NEBTYPE_TIMEDEVENT_EXECUTE, NEBTYPE_TIMEDEVENT_REMOVE};
use crate::broker::{EventBroker, EventMeta, TimedEventInfo};
use crate::error::NebResult;
use crate::squeue::{ScheduleHandle, ScheduleQueue};

/// What a timed event does when it comes due.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ServiceCheck,
    CommandCheck,
    LogRotation,
    ProgramShutdown,
    ProgramRestart,
    CheckReaper,
    OrphanCheck,
    RetentionSave,
    StatusSave,
    ScheduledDowntime,
    ServiceFreshnessCheck,
    ExpireDowntime,
    HostCheck,
    HostFreshnessCheck,
    RescheduleChecks,
    ExpireComment,
    CheckProgramUpdate,
    Sleep,
    UserFunction,
}

impl EventKind {
    /// Numeric event type reported to broker subscribers.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ServiceCheck => 0,
            Self::CommandCheck => 1,
            Self::LogRotation => 2,
            Self::ProgramShutdown => 3,
            Self::ProgramRestart => 4,
            Self::CheckReaper => 5,
            Self::OrphanCheck => 6,
            Self::RetentionSave => 7,
            Self::StatusSave => 8,
            Self::ScheduledDowntime => 9,
            Self::ServiceFreshnessCheck => 10,
            Self::ExpireDowntime => 11,
            Self::HostCheck => 12,
            Self::HostFreshnessCheck => 13,
            Self::RescheduleChecks => 14,
            Self::ExpireComment => 15,
            Self::CheckProgramUpdate => 16,
            Self::Sleep => 98,
            Self::UserFunction => 99,
        }
    }
}

/// A unit of future work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    /// What to do when the event comes due.
    pub kind: EventKind,
    /// Free-form label carried to subscribers (a host or service name, a task name).
    pub label: String,
    /// Whether the event is put back after it runs.
    pub recurring: bool,
    /// Seconds between runs of a recurring event.
    pub interval: u64,
    /// When the event runs next. Kept equal to its queued time.
    pub run_time: DateTime<Utc>,
}

impl TimedEvent {
    /// A one-shot event.
    #[must_use]
    pub fn once(kind: EventKind, label: impl Into<String>, run_time: DateTime<Utc>) -> Self {
        Self {
            kind,
            label: label.into(),
            recurring: false,
            interval: 0,
            run_time,
        }
    }

    /// An event that repeats every `interval` seconds, first at `run_time`.
    #[must_use]
    pub fn every(kind: EventKind, label: impl Into<String>, interval: u64, run_time: DateTime<Utc>) -> Self {
        Self {
            kind,
            label: label.into(),
            recurring: interval > 0,
            interval,
            run_time,
        }
    }

    fn info(&self) -> TimedEventInfo<'_> {
        TimedEventInfo {
            event_type: self.kind.code(),
            recurring: self.recurring,
            run_time: self.run_time,
            interval_secs: self.interval,
            label: &self.label,
        }
    }

    /// One interval after `ran_at`, but never before `now`.
    fn next_run(&self, ran_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = i64::try_from(self.interval).unwrap_or(i64::MAX);
        let next = ran_at
            .checked_add_signed(Duration::seconds(secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        next.max(now)
    }
}

/// Applies `f` to every item, even after a failure. Returns the first error.
fn each_keep_first_err<T, E>(items: impl IntoIterator<Item = T>, mut f: impl FnMut(T) -> Result<(), E>) -> Result<(), E> {
    let mut first = None;
    for item in items {
        if let Err(err) = f(item) {
            first.get_or_insert(err);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Scheduled timed events, reported through the broker.
#[derive(Debug)]
pub struct EventList {
    queue: ScheduleQueue<TimedEvent>,
    broker: Arc<EventBroker>,
}

impl EventList {
    /// An empty list reporting to `broker`, sized for `horizon` events (0 means the default).
    pub fn new(broker: Arc<EventBroker>, horizon: usize) -> NebResult<Self> {
        Ok(Self {
            queue: ScheduleQueue::new(horizon)?,
            broker,
        })
    }

    fn report(&self, kind: i32, event: &TimedEvent) {
        if let Err(err) = self.broker.timed_event(EventMeta::new(kind), Some(&event.info())) {
            warn!(error = %err, kind, "failed to broadcast timed event");
        }
    }

    /// Queues `event` at its run time, pulled forward to now if it is in the past.
    ///
    /// The add is reported only once the event is queued.
    pub fn schedule(&mut self, event: TimedEvent) -> NebResult<ScheduleHandle> {
        let when = event.run_time;
        let handle = self.queue.add_at(when, event)?;
        self.sync_run_time(handle);
        if let Some(queued) = self.queue.get(handle) {
            self.report(NEBTYPE_TIMEDEVENT_ADD, queued);
        }
        Ok(handle)
    }

    fn sync_run_time(&mut self, handle: ScheduleHandle) {
        if let Some(at) = self.queue.runtime(handle) {
            if let Some(event) = self.queue.get_mut(handle) {
                event.run_time = at;
            }
        }
    }

    /// Unqueues an event and returns it.
    pub fn remove(&mut self, handle: ScheduleHandle) -> NebResult<TimedEvent> {
        let event = self.queue.remove(handle)?;
        self.report(NEBTYPE_TIMEDEVENT_REMOVE, &event);
        Ok(event)
    }

    /// Moves a queued event to a new run time.
    pub fn reschedule(&mut self, handle: ScheduleHandle, when: DateTime<Utc>) -> NebResult<()> {
        self.queue.reschedule(handle, when)?;
        self.sync_run_time(handle);
        Ok(())
    }

    /// Runs every event due at or before `now`, in run-time order.
    ///
    /// Recurring events rescheduled by this call are not run again within
    /// the same call. Every recurring event is requeued even if an earlier
    /// one fails; the first failure is returned. Returns the number of
    /// events executed.
    pub fn run_due<F>(&mut self, now: DateTime<Utc>, mut execute: F) -> NebResult<usize>
    where
        F: FnMut(&TimedEvent),
    {
        let mut again = Vec::new();
        let mut ran = 0;

        while let Some((ran_at, event)) = self.queue.pop_due(now) {
            self.report(NEBTYPE_TIMEDEVENT_EXECUTE, &event);
            debug!(kind = ?event.kind, label = %event.label, "executing timed event");
            execute(&event);
            ran += 1;

            if event.recurring && event.interval > 0 {
                let next = event.next_run(ran_at, now);
                again.push(TimedEvent { run_time: next, ..event });
            }
        }

        each_keep_first_err(again, |event| {
            let label = event.label.clone();
            self.schedule(event).map(|_| ()).map_err(|err| {
                warn!(%label, error = %err, "failed to requeue recurring timed event");
                err
            })
        })?;
        Ok(ran)
    }

    /// Run time of the next event.
    #[must_use]
    pub fn next_run_time(&self) -> Option<DateTime<Utc>> {
        self.queue.peek_runtime()
    }

    /// A queued event.
    #[must_use]
    pub fn get(&self, handle: ScheduleHandle) -> Option<&TimedEvent> {
        self.queue.get(handle)
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when no event is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Every queued event in run-time order.
    pub fn iter_in_order(&self) -> impl Iterator<Item = &TimedEvent> + '_ {
        self.queue.iter_in_order().map(|(_, _, event)| event)
    }
}
