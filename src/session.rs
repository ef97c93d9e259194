//! User sessions
//!
//! A session is one user's state machine plus the bot-specific data it
//! operates on. Bots plug in through the [`Bot`] trait, which supplies the
//! transition table, the durable data type and the wake/update hooks.

mod context;

pub use context::{AlarmRequest, Effect, SessionContext};

use crate::error::CallbackError;
use crate::event::{Input, MessageRef, User};
use crate::state_machine::{Machine, Step, StepError, Transition, TransitionTable};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Transition table over a bot's session context
pub type BotTable<B> = TransitionTable<SessionContext<B>, Input>;

/// Supplier of a conversational bot's behavior
pub trait Bot: Send + Sync + Sized + 'static {
    /// Durable business data, persisted as part of the session blob
    type Data: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static;
    /// Transient dialog scratch; never persisted
    type Scratch: Default + Clone + Send + Sync + 'static;

    fn initial_state(&self) -> &str;

    /// Declarative transition list, in priority order per source state
    fn transitions(&self) -> Vec<Transition<SessionContext<Self>, Input>>;

    /// Alarms to re-arm when a session is loaded into memory
    fn wake(&self, _ctx: &SessionContext<Self>) -> Vec<AlarmRequest> {
        Vec::new()
    }

    /// Validation point for the machine output after post-processing
    fn update_state(
        &self,
        _ctx: &mut SessionContext<Self>,
        _output: &Input,
    ) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Build the shared, read-only table for `bot`
pub fn build_table<B: Bot>(bot: &B) -> Arc<BotTable<B>> {
    Arc::new(TransitionTable::new(bot.initial_state(), bot.transitions()))
}

/// Persisted shape of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord<D> {
    pub state: String,
    pub data: D,
}

#[derive(Serialize)]
struct RecordRef<'a, D> {
    state: &'a str,
    data: &'a D,
}

/// Snapshot used to undo a failed dispatch
pub(crate) struct Checkpoint<B: Bot> {
    state: String,
    data: B::Data,
    scratch: B::Scratch,
    last_message: Option<MessageRef>,
}

/// One user's dialog state
pub struct Session<B: Bot> {
    machine: Machine<SessionContext<B>, Input>,
    ctx: SessionContext<B>,
}

impl<B: Bot> fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.ctx.user)
            .field("state", &self.machine.state())
            .finish_non_exhaustive()
    }
}

impl<B: Bot> Session<B> {
    /// Fresh session at the table's initial state
    pub fn new(table: Arc<BotTable<B>>, user: User) -> Self {
        Self {
            machine: Machine::new(table),
            ctx: SessionContext::new(user, B::Data::default()),
        }
    }

    /// Rehydrate from a persisted record
    ///
    /// A state the table no longer declares falls back to the initial state.
    pub fn restore(table: Arc<BotTable<B>>, user: User, record: SessionRecord<B::Data>) -> Self {
        let machine = match Machine::resume(Arc::clone(&table), &record.state) {
            Some(machine) => machine,
            None => {
                tracing::warn!(
                    user = %user.id,
                    state = %record.state,
                    "Stored state not declared by table, restarting from initial state"
                );
                Machine::new(table)
            }
        };
        Self {
            machine,
            ctx: SessionContext::new(user, record.data),
        }
    }

    pub fn from_blob(table: Arc<BotTable<B>>, user: User, blob: &str) -> serde_json::Result<Self> {
        let record: SessionRecord<B::Data> = serde_json::from_str(blob)?;
        Ok(Self::restore(table, user, record))
    }

    pub fn to_blob(&self) -> serde_json::Result<String> {
        serde_json::to_string(&RecordRef {
            state: self.machine.state(),
            data: &self.ctx.data,
        })
    }

    pub fn user(&self) -> &User {
        &self.ctx.user
    }

    pub fn state(&self) -> &str {
        self.machine.state()
    }

    pub fn data(&self) -> &B::Data {
        &self.ctx.data
    }

    pub fn context(&self) -> &SessionContext<B> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SessionContext<B> {
        &mut self.ctx
    }

    /// Feed one input through the machine at time `now`
    pub fn run(
        &mut self,
        input: Input,
        now: DateTime<Utc>,
    ) -> Result<Step<Input>, StepError<Input>> {
        self.ctx.now = now;
        let result = self.machine.run(&mut self.ctx, input);
        if result.is_err() {
            self.ctx.clear_effects();
        }
        result
    }

    pub fn wake(&self, bot: &B) -> Vec<AlarmRequest> {
        bot.wake(&self.ctx)
    }

    pub fn update_state(&mut self, bot: &B, output: &Input) -> Result<(), CallbackError> {
        bot.update_state(&mut self.ctx, output)
    }

    pub(crate) fn take_effects(&mut self) -> Vec<Effect> {
        self.ctx.take_effects()
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint<B> {
        Checkpoint {
            state: self.machine.state().to_string(),
            data: self.ctx.data.clone(),
            scratch: self.ctx.scratch.clone(),
            last_message: self.ctx.last_message(),
        }
    }

    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint<B>) {
        self.machine.restore(checkpoint.state);
        self.ctx.data = checkpoint.data;
        self.ctx.scratch = checkpoint.scratch;
        self.ctx.set_last_message(checkpoint.last_message);
        self.ctx.clear_effects();
    }
}
