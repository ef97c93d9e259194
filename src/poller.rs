//! Live input poller
//!
//! Each tick fetches new events from the transport, then dispatches them:
//! different users concurrently, one user's events in arrival order. The
//! offset advances past a batch even when some of its events fail; the user
//! re-issues the input in that case.

use crate::event::{Event, Signal, UserId};
use crate::runtime::{Dispatcher, Transport};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Outcome counts of one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub received: usize,
    pub dispatched: usize,
    pub failed: usize,
}

pub struct Poller<T> {
    transport: T,
    dispatcher: Arc<dyn Dispatcher>,
    period: Duration,
    offset: i64,
}

impl<T: Transport> Poller<T> {
    pub fn new(transport: T, dispatcher: Arc<dyn Dispatcher>, period: Duration) -> Self {
        Self {
            transport,
            dispatcher,
            period,
            offset: 0,
        }
    }

    /// Offset the next fetch starts from
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Fetch one batch and dispatch it
    pub async fn poll_once(&mut self) -> Result<PollReport, crate::error::TransportError> {
        let batch = self.transport.fetch_new(self.offset).await?;
        let mut report = PollReport {
            received: batch.events.len(),
            ..PollReport::default()
        };

        let dispatcher = self.dispatcher.as_ref();
        let outcomes = join_all(group_by_user(batch.events).into_iter().map(|events| async move {
            let mut ok = 0;
            let mut failed = 0;
            for event in events {
                let user = event.user().id;
                let kind = event.kind();
                match dispatcher.receive(event).await {
                    Ok(()) => ok += 1,
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(user = %user, kind, error = %e, "Failed to process update");
                    }
                }
            }
            (ok, failed)
        }))
        .await;

        for (ok, failed) in outcomes {
            report.dispatched += ok;
            report.failed += failed;
        }
        self.offset = batch.next_offset;
        Ok(report)
    }

    /// Poll every period until cancelled. A poll in progress runs to completion.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period = ?self.period, "Poller started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, offset = self.offset, "Error getting updates");
                    }
                }
            }
        }

        tracing::info!(offset = self.offset, "Poller stopped");
    }
}

/// Split events into per-user runs, keeping arrival order within each user
fn group_by_user(events: Vec<Event>) -> Vec<Vec<Event>> {
    let mut slots: HashMap<UserId, usize> = HashMap::new();
    let mut groups: Vec<Vec<Event>> = Vec::new();
    for event in events {
        let slot = *slots.entry(event.user().id).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(event);
    }
    groups
}
