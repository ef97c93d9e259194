//! Per-session context handed to callbacks
//!
//! Callbacks never perform I/O themselves. They mutate `data`/`scratch` and
//! record effects that the engine executes after the step.

use super::Bot;
use crate::event::{Content, MessageRef, User};
use chrono::{DateTime, Utc};

/// An alarm a session wants armed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmRequest {
    pub kind: String,
    pub name: String,
    pub at: DateTime<Utc>,
}

impl AlarmRequest {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            at,
        }
    }
}

/// Outbound action recorded by a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a new message
    Send { content: Content },
    /// Edit the last interactive message, or send one if there is none.
    /// The resulting message becomes the last interactive message.
    Ask { content: Content },
    /// Stop editing the last interactive message; the next `Ask` sends anew
    Detach,
    /// Arm (or re-arm) an alarm once the session is persisted
    SetAlarm(AlarmRequest),
}

/// Everything a callback may read or change
///
/// `data` is durable. `scratch` and the last interactive message are
/// transient dialog position: they are lost when the session is reloaded
/// from storage unless a callback copies them into `data`.
pub struct SessionContext<B: Bot> {
    pub user: User,
    pub data: B::Data,
    pub scratch: B::Scratch,
    /// Time of the event being processed
    pub now: DateTime<Utc>,
    last_message: Option<MessageRef>,
    effects: Vec<Effect>,
}

impl<B: Bot> SessionContext<B> {
    pub fn new(user: User, data: B::Data) -> Self {
        Self {
            user,
            data,
            scratch: B::Scratch::default(),
            now: Utc::now(),
            last_message: None,
            effects: Vec::new(),
        }
    }

    pub fn send(&mut self, content: impl Into<Content>) {
        self.effects.push(Effect::Send {
            content: content.into(),
        });
    }

    pub fn ask(&mut self, content: Content) {
        self.effects.push(Effect::Ask { content });
    }

    pub fn detach(&mut self) {
        self.effects.push(Effect::Detach);
    }

    pub fn set_alarm(&mut self, kind: &str, name: &str, at: DateTime<Utc>) {
        self.effects
            .push(Effect::SetAlarm(AlarmRequest::new(kind, name, at)));
    }

    /// Effects recorded since the last drain
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn last_message(&self) -> Option<MessageRef> {
        self.last_message
    }

    pub(crate) fn set_last_message(&mut self, message: Option<MessageRef>) {
        self.last_message = message;
    }

    pub(crate) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub(crate) fn clear_effects(&mut self) {
        self.effects.clear();
    }
}
