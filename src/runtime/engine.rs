//! Dispatch engine
//!
//! Single entry point for live input and fired alarms. One `receive`:
//!
//! 1. takes the user's lock and checks the session out of the cache
//! 2. runs the signal's pre-processing hook
//! 3. steps the machine and executes the recorded message effects
//! 4. runs the signal's post-processing hook
//! 5. runs the bot's `update_state` hook
//! 6. persists the session, then arms the alarms the step requested
//!
//! Any failure short-circuits, is tagged with its stage and rolls the
//! in-memory session back to its pre-dispatch checkpoint. Messages already
//! sent are not recalled. A panicking callback or hook fails the dispatch
//! as `Fatal` instead of unwinding into the caller.

use super::cache::SessionCache;
use super::locks::UserLocks;
use super::traits::{Dispatcher, SessionStore, Transport};
use crate::error::{DispatchError, ErrorKind, Stage};
use crate::event::{Event, Signal, User};
use crate::session::{AlarmRequest, Bot, Effect, Session};
use crate::scheduler::AlarmScheduler;
use async_trait::async_trait;
use chrono::Utc;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::Instrument;

pub struct Engine<B: Bot, S, T> {
    bot: Arc<B>,
    cache: SessionCache<B, S>,
    transport: T,
    scheduler: Arc<AlarmScheduler>,
    locks: UserLocks,
}

impl<B, S, T> Engine<B, S, T>
where
    B: Bot,
    S: SessionStore,
    T: Transport + 'static,
{
    pub fn new(
        bot: Arc<B>,
        store: S,
        transport: T,
        scheduler: Arc<AlarmScheduler>,
        cache_capacity: usize,
    ) -> Self {
        let cache = SessionCache::new(
            Arc::clone(&bot),
            store,
            Arc::clone(&scheduler),
            cache_capacity,
        );
        Self {
            bot,
            cache,
            transport,
            scheduler,
            locks: UserLocks::new(),
        }
    }

    pub fn cache(&self) -> &SessionCache<B, S> {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn scheduler(&self) -> &Arc<AlarmScheduler> {
        &self.scheduler
    }

    /// Bulk-load stored sessions so their alarms are armed before traffic
    pub async fn load_sessions(&self) -> Result<usize, DispatchError> {
        self.cache
            .load_all()
            .await
            .map_err(|e| DispatchError::new(Stage::Resolve, e.kind(), e.to_string()))
    }

    /// Process one signal for its user, serialized with every other signal
    /// for the same user
    pub async fn receive_signal<G: Signal + ?Sized>(&self, signal: &G) -> Result<(), DispatchError> {
        let span = tracing::info_span!("receive", user = %signal.user().id);
        self.dispatch(signal).instrument(span).await
    }

    async fn dispatch<G: Signal + ?Sized>(&self, signal: &G) -> Result<(), DispatchError> {
        let user = signal.user().clone();
        let _guard = self.locks.lock(user.id).await;

        let mut session = self
            .cache
            .get(&user)
            .await
            .map_err(|e| DispatchError::new(Stage::Resolve, e.kind(), e.to_string()))?;

        let checkpoint = session.checkpoint();
        match self.advance(&mut session, signal).await {
            Ok(alarms) => {
                self.cache.release(session);
                for request in alarms {
                    self.scheduler.set_alarm(&user, request);
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    stage = %e.stage,
                    kind = %e.kind,
                    error = %e.message,
                    "Dispatch failed, rolling back"
                );
                session.rollback(checkpoint);
                self.cache.release(session);
                Err(e)
            }
        }
    }

    /// Stages 2-6. Returns the alarms to arm once the session is checked in.
    async fn advance<G: Signal + ?Sized>(
        &self,
        session: &mut Session<B>,
        signal: &G,
    ) -> Result<Vec<AlarmRequest>, DispatchError> {
        signal
            .pre_process(&self.transport)
            .await
            .map_err(|e| DispatchError::new(Stage::PreProcess, e.kind, e.message))?;

        let from = session.state().to_string();
        let step = contain(Stage::Evaluate, || session.run(signal.message(), Utc::now()))?
            .map_err(|e| DispatchError::new(Stage::Evaluate, e.error.kind, e.to_string()))?;
        if signal.requires_match() && step.hops == 0 {
            return Err(DispatchError::new(
                Stage::Evaluate,
                ErrorKind::StateMismatch,
                format!("no transition from {from} accepts {:?}", step.output),
            ));
        }
        tracing::debug!(from = %from, to = %step.state, hops = step.hops, "Stepped");
        let alarms = self.execute_effects(session).await?;

        signal
            .post_process(&self.transport)
            .await
            .map_err(|e| DispatchError::new(Stage::PostProcess, e.kind, e.message))?;

        contain(Stage::UpdateState, || session.update_state(&self.bot, &step.output))?
            .map_err(|e| DispatchError::new(Stage::UpdateState, e.kind, e.message))?;

        self.cache
            .put(session)
            .await
            .map_err(|e| DispatchError::new(Stage::Persist, e.kind(), e.to_string()))?;

        Ok(alarms)
    }

    /// Perform message effects in order; alarm effects are returned for later
    async fn execute_effects(
        &self,
        session: &mut Session<B>,
    ) -> Result<Vec<AlarmRequest>, DispatchError> {
        let user: User = session.user().clone();
        let mut alarms = Vec::new();

        for effect in session.take_effects() {
            match effect {
                Effect::Send { content } => {
                    self.transport
                        .send(&user, &content)
                        .await
                        .map_err(|e| DispatchError::new(Stage::Evaluate, e.kind, e.message))?;
                }
                Effect::Ask { content } => {
                    let sent = match session.context().last_message() {
                        Some(message) => self.transport.edit(&user, message, &content).await,
                        None => self.transport.send(&user, &content).await,
                    }
                    .map_err(|e| DispatchError::new(Stage::Evaluate, e.kind, e.message))?;
                    session.context_mut().set_last_message(Some(sent));
                }
                Effect::Detach => session.context_mut().set_last_message(None),
                Effect::SetAlarm(request) => alarms.push(request),
            }
        }
        Ok(alarms)
    }
}

/// Run bot code, turning a panic into a `Fatal` failure of `stage`
fn contain<R>(stage: Stage, f: impl FnOnce() -> R) -> Result<R, DispatchError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = format!("bot code panicked: {}", panic_message(payload.as_ref()));
        tracing::error!(stage = %stage, error = %message, "Contained panic");
        DispatchError::new(stage, ErrorKind::Fatal, message)
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[async_trait]
impl<B, S, T> Dispatcher for Engine<B, S, T>
where
    B: Bot,
    S: SessionStore,
    T: Transport + 'static,
{
    async fn receive(&self, event: Event) -> Result<(), DispatchError> {
        tracing::debug!(kind = event.kind(), "Event received");
        self.receive_signal(&event).await
    }
}
