//! Alarm scheduler
//!
//! Holds every pending alarm across all users in one time-ordered queue.
//! A background loop wakes on a fixed period, detaches the due prefix,
//! releases the lock and dispatches each due alarm as an `AlarmFired`
//! event. Outcomes:
//!
//! - success: the alarm is forgotten
//! - retriable failure: the alarm is queued again for the next tick
//! - fatal failure: the alarm is dropped and logged
//!
//! State-mismatch failures are retriable only up to a configured bound.

mod queue;

pub use queue::{Alarm, AlarmQueue, SetOutcome};

use crate::error::ErrorKind;
use crate::event::{Event, User};
use crate::runtime::Dispatcher;
use crate::session::AlarmRequest;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Interval between wakes
    pub period: Duration,
    /// Retries granted to an alarm that keeps firing into the wrong state
    pub max_mismatch_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            max_mismatch_retries: 10,
        }
    }
}

/// Outcome counts of one wake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fired: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub dropped: usize,
}

pub struct AlarmScheduler {
    queue: Mutex<AlarmQueue>,
    config: SchedulerConfig,
}

impl AlarmScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            queue: Mutex::new(AlarmQueue::new()),
            config,
        }
    }

    fn queue(&self) -> MutexGuard<'_, AlarmQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm (or re-arm) an alarm for `user`
    pub fn set_alarm(&self, user: &User, request: AlarmRequest) -> SetOutcome {
        let outcome = self.queue().set(Alarm::new(
            user.clone(),
            request.kind,
            request.name,
            request.at,
        ));
        tracing::debug!(user = %user.id, ?outcome, "Alarm armed");
        outcome
    }

    /// Alarms waiting in the queue (in-flight alarms excluded)
    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    pub fn armed_at(&self, user: &User, kind: &str, name: &str) -> Option<DateTime<Utc>> {
        self.queue().armed_at(user.id, kind, name)
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.queue().next_due()
    }

    /// Fire every alarm due at `now` and settle the outcomes
    pub async fn fire_due(&self, now: DateTime<Utc>, dispatcher: &dyn Dispatcher) -> TickReport {
        let due = self.queue().take_due(now);
        if due.is_empty() {
            return TickReport::default();
        }

        let mut report = TickReport {
            fired: due.len(),
            ..TickReport::default()
        };

        let outcomes = join_all(due.into_iter().map(|alarm| async move {
            let event = Event::alarm(
                alarm.user.clone(),
                alarm.kind.clone(),
                alarm.name.clone(),
                alarm.at,
            );
            let result = dispatcher.receive(event).await;
            (alarm, result)
        }))
        .await;

        let mut queue = self.queue();
        for (mut alarm, result) in outcomes {
            match result {
                Ok(()) => {
                    queue.complete(&alarm);
                    report.succeeded += 1;
                }
                Err(e)
                    if e.kind == ErrorKind::StateMismatch
                        && alarm.mismatches >= self.config.max_mismatch_retries =>
                {
                    tracing::error!(
                        user = %alarm.user.id,
                        kind = %alarm.kind,
                        name = %alarm.name,
                        retries = alarm.mismatches,
                        error = %e,
                        "Alarm keeps firing into the wrong state, dropping"
                    );
                    queue.complete(&alarm);
                    report.dropped += 1;
                }
                Err(e) if e.is_retriable() => {
                    tracing::warn!(
                        user = %alarm.user.id,
                        kind = %alarm.kind,
                        name = %alarm.name,
                        error = %e,
                        "Alarm dispatch failed, retrying next tick"
                    );
                    if e.kind == ErrorKind::StateMismatch {
                        alarm.mismatches += 1;
                    }
                    if queue.requeue(alarm) {
                        report.requeued += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        user = %alarm.user.id,
                        kind = %alarm.kind,
                        name = %alarm.name,
                        error = %e,
                        "Alarm dispatch failed, dropping"
                    );
                    queue.complete(&alarm);
                    report.dropped += 1;
                }
            }
        }
        report
    }

    /// Wake every period until cancelled. A tick in progress runs to completion.
    pub async fn run(self: Arc<Self>, dispatcher: Arc<dyn Dispatcher>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period = ?self.config.period, "Alarm scheduler started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.fire_due(Utc::now(), dispatcher.as_ref()).await;
                    if report.fired > 0 {
                        tracing::info!(
                            fired = report.fired,
                            succeeded = report.succeeded,
                            requeued = report.requeued,
                            dropped = report.dropped,
                            "Alarm tick"
                        );
                    }
                }
            }
        }

        tracing::info!(pending = self.pending(), "Alarm scheduler stopped");
    }
}
