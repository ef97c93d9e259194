//! Events that drive a user's dialog

use crate::error::TransportError;
use crate::runtime::Transport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identities and outbound content
// ============================================================================

/// Stable identity of a chat user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A chat user as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
}

impl User {
    pub fn new(id: u64, first_name: impl Into<String>) -> Self {
        Self {
            id: UserId(id),
            first_name: first_name.into(),
        }
    }
}

/// Transport-assigned reference to a sent message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef(pub u64);

/// Inline button; `data` comes back in a [`ButtonPress`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Outbound message: text plus optional rows of buttons
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Content {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Vec<Button>>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    /// Text with one row of buttons
    pub fn with_row(text: impl Into<String>, row: Vec<Button>) -> Self {
        Self {
            text: text.into(),
            buttons: vec![row],
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.buttons.iter().any(|row| !row.is_empty())
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

// ============================================================================
// Machine input
// ============================================================================

/// Input fed to a user's state machine
///
/// Callbacks return an `Input` too; `Empty` ends a chain in most tables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Input {
    #[default]
    Empty,
    /// Free text typed by the user
    Text(String),
    /// Data of a pressed button
    Button(String),
    /// A fired alarm
    Alarm { kind: String, name: String },
    /// Synthetic input produced by a callback for a follow-up hop
    Command(String),
}

impl Input {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn button(&self) -> Option<&str> {
        match self {
            Self::Button(data) => Some(data),
            _ => None,
        }
    }

    pub fn alarm(&self) -> Option<(&str, &str)> {
        match self {
            Self::Alarm { kind, name } => Some((kind, name)),
            _ => None,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// A text message from the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub user: User,
    pub message_id: MessageRef,
    pub text: String,
}

/// An inline button press
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonPress {
    pub user: User,
    /// Transport id used to acknowledge the press
    pub interaction_id: String,
    pub data: String,
}

/// An alarm reaching its fire time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmFired {
    pub user: User,
    pub kind: String,
    pub name: String,
    pub at: DateTime<Utc>,
}

/// Stimulus entering the dispatch engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    UserMessage(IncomingMessage),
    ButtonPress(ButtonPress),
    AlarmFired(AlarmFired),
}

impl Event {
    pub fn message(user: User, message_id: u64, text: impl Into<String>) -> Self {
        Self::UserMessage(IncomingMessage {
            user,
            message_id: MessageRef(message_id),
            text: text.into(),
        })
    }

    pub fn button(user: User, interaction_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self::ButtonPress(ButtonPress {
            user,
            interaction_id: interaction_id.into(),
            data: data.into(),
        })
    }

    pub fn alarm(
        user: User,
        kind: impl Into<String>,
        name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::AlarmFired(AlarmFired {
            user,
            kind: kind.into(),
            name: name.into(),
            at,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserMessage(_) => "message",
            Self::ButtonPress(_) => "button",
            Self::AlarmFired(_) => "alarm",
        }
    }
}

/// What the engine needs from an event
///
/// `Event` is the production implementation; tests script their own.
#[async_trait]
pub trait Signal: Send + Sync {
    fn user(&self) -> &User;

    /// Input handed to the state machine
    fn message(&self) -> Input;

    /// Whether taking no transition means the event arrived in the wrong state
    fn requires_match(&self) -> bool {
        false
    }

    async fn pre_process(&self, transport: &dyn Transport) -> Result<(), TransportError>;

    async fn post_process(&self, transport: &dyn Transport) -> Result<(), TransportError>;
}

#[async_trait]
impl Signal for Event {
    fn user(&self) -> &User {
        match self {
            Self::UserMessage(m) => &m.user,
            Self::ButtonPress(b) => &b.user,
            Self::AlarmFired(a) => &a.user,
        }
    }

    fn message(&self) -> Input {
        match self {
            Self::UserMessage(m) => Input::Text(m.text.clone()),
            Self::ButtonPress(b) => Input::Button(b.data.clone()),
            Self::AlarmFired(a) => Input::Alarm {
                kind: a.kind.clone(),
                name: a.name.clone(),
            },
        }
    }

    fn requires_match(&self) -> bool {
        matches!(self, Self::AlarmFired(_))
    }

    async fn pre_process(&self, transport: &dyn Transport) -> Result<(), TransportError> {
        match self {
            Self::ButtonPress(b) => transport.answer_interaction(&b.interaction_id).await,
            Self::UserMessage(_) | Self::AlarmFired(_) => Ok(()),
        }
    }

    async fn post_process(&self, _transport: &dyn Transport) -> Result<(), TransportError> {
        Ok(())
    }
}
