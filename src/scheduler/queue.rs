//! Time-ordered alarm queue with a per-user key index
//!
//! Pure data structure; the scheduler wraps it in a lock.
//!
//! The index tracks every alarm that is pending *or* in flight. `take_due`
//! detaches alarms from the queue but leaves them indexed, so a re-arm that
//! happens while an alarm is firing is visible when the outcome comes back.

use crate::event::{User, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A scheduled future event for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alarm {
    pub user: User,
    pub kind: String,
    pub name: String,
    pub at: DateTime<Utc>,
    /// Consecutive state-mismatch failures of this arming
    pub mismatches: u32,
}

impl Alarm {
    pub fn new(
        user: User,
        kind: impl Into<String>,
        name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            user,
            kind: kind.into(),
            name: name.into(),
            at,
            mismatches: 0,
        }
    }

    fn same_key(&self, kind: &str, name: &str) -> bool {
        self.kind == kind && self.name == name
    }
}

/// Result of arming an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Inserted,
    /// The key existed with a different fire time
    Rescheduled,
    /// The key existed with the same fire time
    Unchanged,
}

type AlarmKey = (String, String);

#[derive(Debug, Default)]
pub struct AlarmQueue {
    /// user -> (kind, name) -> fire time of the live arming
    index: HashMap<UserId, HashMap<AlarmKey, DateTime<Utc>>>,
    /// Pending alarms, ascending by fire time; equal times keep arming order
    queue: Vec<Alarm>,
}

impl AlarmQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the alarm keyed by (user, kind, name)
    pub fn set(&mut self, alarm: Alarm) -> SetOutcome {
        let key = (alarm.kind.clone(), alarm.name.clone());
        let previous = self
            .index
            .entry(alarm.user.id)
            .or_default()
            .insert(key, alarm.at);

        match previous {
            Some(at) if at == alarm.at => SetOutcome::Unchanged,
            Some(_) => {
                self.remove_queued(alarm.user.id, &alarm.kind, &alarm.name);
                self.insert_sorted(alarm);
                SetOutcome::Rescheduled
            }
            None => {
                self.insert_sorted(alarm);
                SetOutcome::Inserted
            }
        }
    }

    /// Detach every alarm with `at <= now`
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Alarm> {
        let due = self.queue.partition_point(|alarm| alarm.at <= now);
        self.queue.drain(..due).collect()
    }

    /// Forget a fired alarm unless it was re-armed while in flight.
    /// Returns whether the index entry was removed.
    pub fn complete(&mut self, alarm: &Alarm) -> bool {
        let Some(keys) = self.index.get_mut(&alarm.user.id) else {
            return false;
        };
        let key = (alarm.kind.clone(), alarm.name.clone());
        if keys.get(&key) != Some(&alarm.at) {
            return false;
        }
        keys.remove(&key);
        if keys.is_empty() {
            self.index.remove(&alarm.user.id);
        }
        true
    }

    /// Put a failed alarm back for the next tick. An alarm re-armed while in
    /// flight is superseded and dropped instead. Returns whether it was queued.
    pub fn requeue(&mut self, alarm: Alarm) -> bool {
        if self.armed_at(alarm.user.id, &alarm.kind, &alarm.name) != Some(alarm.at) {
            return false;
        }
        self.insert_sorted(alarm);
        true
    }

    /// Fire time of the live arming for a key, pending or in flight
    pub fn armed_at(&self, user: UserId, kind: &str, name: &str) -> Option<DateTime<Utc>> {
        self.index
            .get(&user)?
            .get(&(kind.to_string(), name.to_string()))
            .copied()
    }

    /// Alarms waiting in the queue
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Earliest pending fire time
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.queue.first().map(|alarm| alarm.at)
    }

    pub fn pending(&self) -> &[Alarm] {
        &self.queue
    }

    fn insert_sorted(&mut self, alarm: Alarm) {
        let pos = self.queue.partition_point(|queued| queued.at <= alarm.at);
        self.queue.insert(pos, alarm);
    }

    fn remove_queued(&mut self, user: UserId, kind: &str, name: &str) {
        self.queue
            .retain(|queued| !(queued.user.id == user && queued.same_key(kind, name)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn alarm(user: u64, name: &str, at: i64) -> Alarm {
        Alarm::new(User::new(user, "u"), "reminder", name, t(at))
    }

    #[test]
    fn set_twice_keeps_one_entry_at_new_time() {
        let mut queue = AlarmQueue::new();
        assert_eq!(queue.set(alarm(1, "daily", 10)), SetOutcome::Inserted);
        assert_eq!(queue.set(alarm(1, "daily", 20)), SetOutcome::Rescheduled);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(t(20)));
        assert_eq!(queue.armed_at(UserId(1), "reminder", "daily"), Some(t(20)));
    }

    #[test]
    fn set_same_time_is_noop() {
        let mut queue = AlarmQueue::new();
        queue.set(alarm(1, "daily", 10));
        assert_eq!(queue.set(alarm(1, "daily", 10)), SetOutcome::Unchanged);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn keys_are_scoped_per_user_and_kind() {
        let mut queue = AlarmQueue::new();
        queue.set(alarm(1, "daily", 10));
        queue.set(alarm(2, "daily", 10));
        queue.set(Alarm::new(User::new(1, "u"), "timeout", "daily", t(10)));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn take_due_detaches_prefix() {
        let mut queue = AlarmQueue::new();
        queue.set(alarm(1, "c", 30));
        queue.set(alarm(1, "a", 10));
        queue.set(alarm(1, "b", 20));

        let due = queue.take_due(t(20));
        let names: Vec<_> = due.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(queue.len(), 1);
        // Detached alarms stay indexed until their outcome is known
        assert_eq!(queue.armed_at(UserId(1), "reminder", "a"), Some(t(10)));
    }

    #[test]
    fn complete_forgets_alarm() {
        let mut queue = AlarmQueue::new();
        queue.set(alarm(1, "daily", 10));
        let due = queue.take_due(t(10));
        assert!(queue.complete(&due[0]));
        assert_eq!(queue.armed_at(UserId(1), "reminder", "daily"), None);
    }

    #[test]
    fn rearm_while_in_flight_survives_completion() {
        let mut queue = AlarmQueue::new();
        queue.set(alarm(1, "daily", 10));
        let due = queue.take_due(t(10));

        // The firing callback arms tomorrow's reminder
        assert_eq!(queue.set(alarm(1, "daily", 10 + 86_400)), SetOutcome::Rescheduled);
        assert!(!queue.complete(&due[0]));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(t(10 + 86_400)));
    }

    #[test]
    fn requeue_restores_failed_alarm() {
        let mut queue = AlarmQueue::new();
        queue.set(alarm(1, "daily", 10));
        let mut due = queue.take_due(t(10));
        assert!(queue.requeue(due.remove(0)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn requeue_of_superseded_alarm_is_dropped() {
        let mut queue = AlarmQueue::new();
        queue.set(alarm(1, "daily", 10));
        let mut due = queue.take_due(t(10));
        queue.set(alarm(1, "daily", 50));

        assert!(!queue.requeue(due.remove(0)));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_due(), Some(t(50)));
    }

    #[test]
    fn equal_times_keep_arming_order() {
        let mut queue = AlarmQueue::new();
        queue.set(alarm(1, "first", 10));
        queue.set(alarm(2, "second", 10));
        let due = queue.take_due(t(10) + Duration::seconds(1));
        assert_eq!(due[0].name, "first");
        assert_eq!(due[1].name, "second");
    }

    proptest! {
        #[test]
        fn queue_stays_sorted_and_unique(ops in prop::collection::vec((0u64..4, 0usize..3, 0i64..100), 1..60)) {
            let names = ["a", "b", "c"];
            let mut queue = AlarmQueue::new();
            for (user, name, at) in ops {
                queue.set(alarm(user, names[name], at));
            }

            let pending = queue.pending();
            prop_assert!(pending.windows(2).all(|w| w[0].at <= w[1].at));

            let mut keys: Vec<_> = pending
                .iter()
                .map(|a| (a.user.id, a.kind.clone(), a.name.clone()))
                .collect();
            let total = keys.len();
            keys.sort();
            keys.dedup();
            prop_assert_eq!(keys.len(), total);

            for a in pending {
                prop_assert_eq!(queue.armed_at(a.user.id, &a.kind, &a.name), Some(a.at));
            }
        }
    }
}
