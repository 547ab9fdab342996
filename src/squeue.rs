//! Scheduling queue keyed by wall-clock run time.
//!
//! Run times are packed into a heap priority as `(unix_secs << 32) | micros`,
//! so entries order by second first and microsecond second. Nothing can be
//! scheduled in the past: a run time whose seconds precede the current
//! second is pulled forward to now, keeping its sub-second part.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::QueueError;
use crate::pqueue::{Handle, InOrder, MinFirst, Priority, PriorityQueue};

/// Slot count used when a queue is created with a horizon of 0.
pub const DEFAULT_HORIZON: usize = 127;

/// Handle to a scheduled entry.
pub type ScheduleHandle = Handle;

fn pack(secs: u64, micros: u32) -> Priority {
    (secs << 32) | u64::from(micros)
}

fn unpack(priority: Priority) -> DateTime<Utc> {
    let secs = i64::try_from(priority >> 32).unwrap_or(i64::MAX);
    let micros = (priority & 0xffff_ffff) as u32;
    Utc.timestamp_opt(secs, micros.saturating_mul(1000))
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn unix_secs(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp()).unwrap_or(0)
}

fn runtime_priority(when: DateTime<Utc>, now: DateTime<Utc>) -> Priority {
    let secs = unix_secs(when).max(unix_secs(now));
    pack(secs, when.timestamp_subsec_micros().min(999_999))
}

/// Time-ordered queue of scheduled items.
#[derive(Debug)]
pub struct ScheduleQueue<T> {
    pq: PriorityQueue<T, MinFirst>,
}

impl<T> ScheduleQueue<T> {
    /// Creates a queue sized for `horizon` entries before its first growth.
    pub fn new(horizon: usize) -> Result<Self, QueueError> {
        let horizon = if horizon == 0 { DEFAULT_HORIZON } else { horizon };
        Ok(Self {
            pq: PriorityQueue::min_first(horizon)?,
        })
    }

    /// Schedules `data` to run at `when`.
    pub fn add_at(&mut self, when: DateTime<Utc>, data: T) -> Result<ScheduleHandle, QueueError> {
        self.add_relative(when, Utc::now(), data)
    }

    /// Schedules `data` at whole second `secs`, using the current sub-second
    /// offset so entries added within one second keep their order.
    pub fn add(&mut self, secs: i64, data: T) -> Result<ScheduleHandle, QueueError> {
        let now = Utc::now();
        let micros = now.timestamp_subsec_micros().min(999_999);
        self.insert_at(secs, micros, now, data)
    }

    /// Schedules `data` at `secs` plus `usec` microseconds.
    pub fn add_usec(&mut self, secs: i64, usec: u32, data: T) -> Result<ScheduleHandle, QueueError> {
        self.insert_at(secs, usec.min(999_999), Utc::now(), data)
    }

    /// Schedules `data` at `secs` plus `msec` milliseconds.
    pub fn add_msec(&mut self, secs: i64, msec: u32, data: T) -> Result<ScheduleHandle, QueueError> {
        self.add_usec(secs, msec.min(999).saturating_mul(1000), data)
    }

    fn insert_at(&mut self, secs: i64, micros: u32, now: DateTime<Utc>, data: T) -> Result<ScheduleHandle, QueueError> {
        let secs = u64::try_from(secs).unwrap_or(0).max(unix_secs(now));
        self.pq.insert(data, pack(secs, micros))
    }

    pub(crate) fn add_relative(
        &mut self,
        when: DateTime<Utc>,
        now: DateTime<Utc>,
        data: T,
    ) -> Result<ScheduleHandle, QueueError> {
        self.pq.insert(data, runtime_priority(when, now))
    }

    /// Moves an entry to a new run time.
    pub fn reschedule(&mut self, handle: ScheduleHandle, when: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
        let old = self.pq.change_priority(handle, runtime_priority(when, Utc::now()))?;
        Ok(unpack(old))
    }

    /// The entry due soonest.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.pq.peek()
    }

    /// Run time of the entry due soonest.
    #[must_use]
    pub fn peek_runtime(&self) -> Option<DateTime<Utc>> {
        self.pq.peek_priority().map(unpack)
    }

    /// Removes and returns the entry due soonest.
    pub fn pop(&mut self) -> Option<T> {
        self.pq.pop()
    }

    /// Removes and returns the soonest entry with its run time.
    pub fn pop_entry(&mut self) -> Option<(DateTime<Utc>, T)> {
        self.pq.pop_entry().map(|(_, pri, data)| (unpack(pri), data))
    }

    /// Removes and returns the soonest entry if it is due at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, T)> {
        match self.peek_runtime() {
            Some(at) if at <= now => self.pop_entry(),
            _ => None,
        }
    }

    /// Unschedules an entry and returns it.
    pub fn remove(&mut self, handle: ScheduleHandle) -> Result<T, QueueError> {
        self.pq.remove(handle)
    }

    /// Scheduled run time of an entry.
    #[must_use]
    pub fn runtime(&self, handle: ScheduleHandle) -> Option<DateTime<Utc>> {
        self.pq.priority(handle).map(unpack)
    }

    /// The scheduled item, if `handle` is still queued.
    #[must_use]
    pub fn get(&self, handle: ScheduleHandle) -> Option<&T> {
        self.pq.get(handle)
    }

    /// Mutable access to a scheduled item. Changing it does not move it.
    pub fn get_mut(&mut self, handle: ScheduleHandle) -> Option<&mut T> {
        self.pq.get_mut(handle)
    }

    /// Whether `handle` is still queued.
    #[must_use]
    pub fn contains(&self, handle: ScheduleHandle) -> bool {
        self.pq.contains(handle)
    }

    /// Number of scheduled items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pq.len()
    }

    /// True when nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pq.is_empty()
    }

    /// Walks every entry in run-time order without dequeuing anything.
    pub fn iter_in_order(&self) -> impl Iterator<Item = (ScheduleHandle, DateTime<Utc>, &T)> + '_ {
        let walk: InOrder<'_, T, MinFirst> = self.pq.iter_in_order();
        walk.map(|(handle, pri, data)| (handle, unpack(pri), data))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn at(secs: i64, micros: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, micros * 1000).single().unwrap()
    }

    #[test]
    fn test_zero_horizon_uses_default() {
        let q: ScheduleQueue<()> = ScheduleQueue::new(0).unwrap();
        assert_eq!(q.pq.capacity(), DEFAULT_HORIZON);
        assert!(q.is_empty());
    }

    #[test]
    fn test_orders_by_second_then_micros() {
        let now = at(1_000, 0);
        let mut q = ScheduleQueue::new(4).unwrap();
        q.add_relative(at(1_010, 500), now, "c").unwrap();
        q.add_relative(at(1_005, 0), now, "a").unwrap();
        q.add_relative(at(1_010, 20), now, "b").unwrap();

        assert_eq!(q.peek(), Some(&"a"));
        assert_eq!(q.peek_runtime(), Some(at(1_005, 0)));
        let order: Vec<&str> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_past_run_time_clamps_to_now_keeping_micros() {
        let now = at(2_000, 999);
        let mut q = ScheduleQueue::new(2).unwrap();
        let h = q.add_relative(at(1_500, 250), now, ()).unwrap();
        assert_eq!(q.runtime(h), Some(at(2_000, 250)));
    }

    #[test]
    fn test_add_variants_never_schedule_in_the_past() {
        let mut q = ScheduleQueue::new(8).unwrap();
        let floor = Utc::now().timestamp();
        let a = q.add(0, 'a').unwrap();
        let b = q.add_usec(0, 42, 'b').unwrap();
        let c = q.add_msec(0, 7, 'c').unwrap();

        for h in [a, b, c] {
            assert!(q.runtime(h).unwrap().timestamp() >= floor);
        }
        assert_eq!(q.runtime(b).unwrap().timestamp_subsec_micros(), 42);
        assert_eq!(q.runtime(c).unwrap().timestamp_subsec_micros(), 7_000);
    }

    #[test]
    fn test_remove_and_reschedule() {
        let mut q = ScheduleQueue::new(4).unwrap();
        let base = Utc::now() + Duration::seconds(60);
        let a = q.add_at(base, "a").unwrap();
        let b = q.add_at(base + Duration::seconds(10), "b").unwrap();
        let c = q.add_at(base + Duration::seconds(20), "c").unwrap();

        assert_eq!(q.remove(a).unwrap(), "a");
        assert!(q.remove(a).is_err());
        assert_eq!(q.peek(), Some(&"b"));

        q.reschedule(c, base).unwrap();
        assert_eq!(q.peek(), Some(&"c"));
        *q.get_mut(b).unwrap() = "b2";
        assert_eq!(q.runtime(b).unwrap().timestamp(), (base + Duration::seconds(10)).timestamp());
        assert_eq!(q.get(b), Some(&"b2"));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_pop_due_respects_now() {
        let mut q = ScheduleQueue::new(4).unwrap();
        let soon = Utc::now() + Duration::seconds(30);
        q.add_at(soon, 1).unwrap();

        assert!(q.pop_due(soon - Duration::seconds(5)).is_none());
        let (when, value) = q.pop_due(soon + Duration::seconds(1)).unwrap();
        assert_eq!(value, 1);
        assert_eq!(when.timestamp(), soon.timestamp());
    }

    #[test]
    fn test_iter_in_order_is_non_destructive() {
        let now = at(5_000, 0);
        let mut q = ScheduleQueue::new(2).unwrap();
        for (offset, tag) in [(30, "c"), (10, "a"), (20, "b"), (40, "d")] {
            q.add_relative(at(5_000 + offset, 0), now, tag).unwrap();
        }
        let tags: Vec<&str> = q.iter_in_order().map(|(_, _, t)| *t).collect();
        assert_eq!(tags, vec!["a", "b", "c", "d"]);
        assert_eq!(q.len(), 4);
    }
}
