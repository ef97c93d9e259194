//! Mock implementations for testing
//!
//! These mocks let the engine, cache, scheduler and poller be exercised
//! without a chat backend or a database.

use super::traits::*;
use crate::db::{DbError, StoredUser};
use crate::error::{CallbackError, DispatchError, TransportError};
use crate::event::{Content, Event, Input, MessageRef, Signal, User, UserId};
use crate::session::{AlarmRequest, Bot, SessionContext};
use crate::state_machine::Transition;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

// ============================================================================
// Mock Transport
// ============================================================================

/// A message as the mock transport saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub user: UserId,
    pub message: MessageRef,
    pub content: Content,
    /// Whether this replaced an earlier message
    pub edited: bool,
}

/// Transport that records outbound traffic and replays queued batches
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<SentMessage>>,
    answered: Mutex<Vec<String>>,
    batches: Mutex<VecDeque<Result<Batch, TransportError>>>,
    offsets: Mutex<Vec<i64>>,
    next_ref: AtomicU64,
    fail_sends: AtomicBool,
    fail_answers: AtomicBool,
    stall_sends: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_answers(&self, fail: bool) {
        self.fail_answers.store(fail, Ordering::SeqCst);
    }

    /// Make sends never complete, so a dispatch can be cancelled mid-flight
    pub fn stall_sends(&self, stall: bool) {
        self.stall_sends.store(stall, Ordering::SeqCst);
    }

    /// Queue the result of the next `fetch_new`
    pub fn queue_batch(&self, batch: Batch) {
        self.batches.lock().unwrap().push_back(Ok(batch));
    }

    pub fn queue_fetch_error(&self, error: TransportError) {
        self.batches.lock().unwrap().push_back(Err(error));
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.content.text.clone())
            .collect()
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }

    /// Offsets passed to `fetch_new`, in call order
    pub fn fetch_offsets(&self) -> Vec<i64> {
        self.offsets.lock().unwrap().clone()
    }

    fn record(&self, user: &User, message: MessageRef, content: &Content, edited: bool) {
        self.sent.lock().unwrap().push(SentMessage {
            user: user.id,
            message,
            content: content.clone(),
            edited,
        });
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, user: &User, content: &Content) -> Result<MessageRef, TransportError> {
        if self.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::network("mock send failure"));
        }
        let message = MessageRef(self.next_ref.fetch_add(1, Ordering::SeqCst) + 1);
        self.record(user, message, content, false);
        Ok(message)
    }

    async fn edit(
        &self,
        user: &User,
        message: MessageRef,
        content: &Content,
    ) -> Result<MessageRef, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::network("mock edit failure"));
        }
        self.record(user, message, content, true);
        Ok(message)
    }

    async fn answer_interaction(&self, interaction_id: &str) -> Result<(), TransportError> {
        if self.fail_answers.load(Ordering::SeqCst) {
            return Err(TransportError::network("mock answer failure"));
        }
        self.answered.lock().unwrap().push(interaction_id.to_string());
        Ok(())
    }

    async fn fetch_new(&self, offset: i64) -> Result<Batch, TransportError> {
        self.offsets.lock().unwrap().push(offset);
        self.batches.lock().unwrap().pop_front().unwrap_or(Ok(Batch {
            events: Vec::new(),
            next_offset: offset,
        }))
    }
}

// ============================================================================
// In-Memory Session Store
// ============================================================================

/// Session store backed by a map, with failure injection
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<UserId, (User, String)>>,
    reads: AtomicUsize,
    upserts: AtomicUsize,
    fail_reads: AtomicBool,
    fail_upserts: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a blob directly, bypassing failure injection
    pub fn insert_raw(&self, user: &User, blob: &str) {
        self.records
            .lock()
            .unwrap()
            .insert(user.id, (user.clone(), blob.to_string()));
    }

    pub fn blob(&self, id: UserId) -> Option<String> {
        self.records
            .lock()
            .unwrap()
            .get(&id)
            .map(|(_, blob)| blob.clone())
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Successful upserts
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn upsert(&self, user: &User, blob: &str) -> Result<(), DbError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("injected upsert failure".to_string()));
        }
        self.insert_raw(user, blob);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self, id: UserId) -> Result<StoredUser, DbError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("injected read failure".to_string()));
        }
        self.records
            .lock()
            .unwrap()
            .get(&id)
            .map(|(user, blob)| StoredUser {
                user: user.clone(),
                contents: blob.clone(),
                updated_at: Utc::now(),
            })
            .ok_or(DbError::UserNotFound(id))
    }

    async fn enumerate(&self) -> Result<Vec<StoredUser>, DbError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("injected enumerate failure".to_string()));
        }
        let mut all: Vec<StoredUser> = self
            .records
            .lock()
            .unwrap()
            .values()
            .map(|(user, blob)| StoredUser {
                user: user.clone(),
                contents: blob.clone(),
                updated_at: Utc::now(),
            })
            .collect();
        all.sort_by_key(|stored| stored.user.id);
        Ok(all)
    }
}

// ============================================================================
// Ping Bot
// ============================================================================

/// Durable data of [`PingBot`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingData {
    pub pings: u32,
    pub counted: u32,
    pub reminders: u32,
    pub reminder_at: Option<DateTime<Utc>>,
}

/// Minimal two-state bot
///
/// - `start` --"ping"--> `wait`, replying "pong"
/// - "count" increments a counter in any state
/// - "arm:<secs>" arms the daily reminder
/// - "ask" / "detach" exercise the interactive message
/// - "boom" and "busy" fail with bad input and transient errors
/// - "loop" chains forever
/// - "panic" panics inside its callback
/// - the daily reminder is only accepted in `start`
#[derive(Debug, Clone, Default)]
pub struct PingBot {
    /// Make `update_state` reject every output
    pub fail_update: bool,
}

type PingContext = SessionContext<PingBot>;

fn is_text(
    expected: &'static str,
) -> impl Fn(&PingContext, &str, &Input) -> bool + Send + Sync + 'static {
    move |_, _, input| input.text() == Some(expected)
}

impl Bot for PingBot {
    type Data = PingData;
    type Scratch = ();

    fn initial_state(&self) -> &str {
        "start"
    }

    fn transitions(&self) -> Vec<Transition<PingContext, Input>> {
        let mut table = vec![Transition::new("start", "wait")
            .when(is_text("ping"))
            .then(|ctx: &mut PingContext, _| {
                ctx.data.pings += 1;
                ctx.send("pong");
                Ok(Input::Command("pong".into()))
            })];

        for state in ["start", "wait"] {
            table.push(
                Transition::new(state, state)
                    .when(is_text("count"))
                    .then(|ctx: &mut PingContext, _| {
                        ctx.data.counted += 1;
                        Ok(Input::Empty)
                    }),
            );
            table.push(
                Transition::new(state, state)
                    .when(|_: &PingContext, _: &str, input: &Input| {
                        input.text().is_some_and(|t| t.starts_with("arm:"))
                    })
                    .then(|ctx: &mut PingContext, input: Input| {
                        let secs: i64 = input
                            .text()
                            .and_then(|t| t.strip_prefix("arm:"))
                            .and_then(|s| s.parse().ok())
                            .ok_or_else(|| CallbackError::bad_input("arm:<secs> expected"))?;
                        let at = ctx.now + Duration::seconds(secs);
                        ctx.data.reminder_at = Some(at);
                        ctx.set_alarm("reminder", "daily", at);
                        Ok(Input::Empty)
                    }),
            );
            table.push(
                Transition::new(state, state)
                    .when(is_text("ask"))
                    .then(|ctx: &mut PingContext, _| {
                        ctx.ask(Content::with_row(
                            "menu",
                            vec![crate::event::Button::new("Ping", "ping")],
                        ));
                        Ok(Input::Empty)
                    }),
            );
            table.push(
                Transition::new(state, state)
                    .when(is_text("detach"))
                    .then(|ctx: &mut PingContext, _| {
                        ctx.detach();
                        Ok(Input::Empty)
                    }),
            );
        }

        table.extend([
            Transition::new("start", "start")
                .when(is_text("boom"))
                .then(|_: &mut PingContext, _| Err(CallbackError::bad_input("boom"))),
            Transition::new("start", "start")
                .when(is_text("busy"))
                .then(|_: &mut PingContext, _| Err(CallbackError::transient("busy"))),
            Transition::new("start", "start").when(is_text("loop")),
            Transition::new("start", "start")
                .when(is_text("panic"))
                .then(|ctx: &mut PingContext, _| -> Result<Input, CallbackError> {
                    ctx.data.pings += 100;
                    panic!("callback exploded")
                }),
            Transition::new("start", "start")
                .when(|_: &PingContext, _: &str, input: &Input| {
                    input.alarm() == Some(("reminder", "daily"))
                })
                .then(|ctx: &mut PingContext, _| {
                    ctx.data.reminders += 1;
                    ctx.data.reminder_at = None;
                    ctx.send("reminder");
                    Ok(Input::Empty)
                }),
        ]);
        table
    }

    fn wake(&self, ctx: &PingContext) -> Vec<AlarmRequest> {
        ctx.data
            .reminder_at
            .map(|at| vec![AlarmRequest::new("reminder", "daily", at)])
            .unwrap_or_default()
    }

    fn update_state(&self, _ctx: &mut PingContext, _output: &Input) -> Result<(), CallbackError> {
        if self.fail_update {
            return Err(CallbackError::fatal("update rejected"));
        }
        Ok(())
    }
}

// ============================================================================
// Scripted Dispatcher
// ============================================================================

/// Dispatcher that records events and answers them from a per-key script.
/// Unscripted events succeed.
#[derive(Default)]
pub struct ScriptedDispatcher {
    scripts: Mutex<HashMap<String, VecDeque<Result<(), DispatchError>>>>,
    received: Mutex<Vec<Event>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results for events keyed by `name`: the alarm name, the
    /// message text or the button data
    pub fn script(&self, name: &str, results: Vec<Result<(), DispatchError>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend(results);
    }

    pub fn received(&self) -> Vec<Event> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn receive(&self, event: Event) -> Result<(), DispatchError> {
        let name = match &event {
            Event::AlarmFired(alarm) => alarm.name.clone(),
            Event::UserMessage(message) => message.text.clone(),
            Event::ButtonPress(press) => press.data.clone(),
        };
        self.received.lock().unwrap().push(event);
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}

// ============================================================================
// Mock Signal
// ============================================================================

/// Signal with injectable hook failures
pub struct MockSignal {
    user: User,
    input: Input,
    requires_match: bool,
    fail_pre: Option<TransportError>,
    fail_post: Option<TransportError>,
    pre_calls: AtomicUsize,
    post_calls: AtomicUsize,
}

impl MockSignal {
    pub fn new(user: User, input: Input) -> Self {
        Self {
            user,
            input,
            requires_match: false,
            fail_pre: None,
            fail_post: None,
            pre_calls: AtomicUsize::new(0),
            post_calls: AtomicUsize::new(0),
        }
    }

    pub fn text(user: User, text: &str) -> Self {
        Self::new(user, Input::Text(text.to_string()))
    }

    #[must_use]
    pub fn requiring_match(mut self) -> Self {
        self.requires_match = true;
        self
    }

    #[must_use]
    pub fn fail_pre(mut self, error: TransportError) -> Self {
        self.fail_pre = Some(error);
        self
    }

    #[must_use]
    pub fn fail_post(mut self, error: TransportError) -> Self {
        self.fail_post = Some(error);
        self
    }

    pub fn pre_calls(&self) -> usize {
        self.pre_calls.load(Ordering::SeqCst)
    }

    pub fn post_calls(&self) -> usize {
        self.post_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signal for MockSignal {
    fn user(&self) -> &User {
        &self.user
    }

    fn message(&self) -> Input {
        self.input.clone()
    }

    fn requires_match(&self) -> bool {
        self.requires_match
    }

    async fn pre_process(&self, _transport: &dyn Transport) -> Result<(), TransportError> {
        self.pre_calls.fetch_add(1, Ordering::SeqCst);
        self.fail_pre.clone().map_or(Ok(()), Err)
    }

    async fn post_process(&self, _transport: &dyn Transport) -> Result<(), TransportError> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        self.fail_post.clone().map_or(Ok(()), Err)
    }
}
