//! Trait abstractions for runtime I/O
//!
//! These traits let the engine, poller and scheduler run against mock
//! collaborators in tests.

use crate::db::{Database, DbError, StoredUser};
use crate::error::{DispatchError, TransportError};
use crate::event::{Content, Event, MessageRef, User, UserId};
use async_trait::async_trait;
use std::sync::Arc;

/// Events returned by one poll of the transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub events: Vec<Event>,
    /// Offset to pass to the next `fetch_new`
    pub next_offset: i64,
}

/// Chat backend client
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a new message to the user
    async fn send(&self, user: &User, content: &Content) -> Result<MessageRef, TransportError>;

    /// Replace the content of a previously sent message
    async fn edit(
        &self,
        user: &User,
        message: MessageRef,
        content: &Content,
    ) -> Result<MessageRef, TransportError>;

    /// Acknowledge a button press
    async fn answer_interaction(&self, interaction_id: &str) -> Result<(), TransportError>;

    /// Fetch events newer than `offset`. Must be idempotent for a given offset.
    async fn fetch_new(&self, offset: i64) -> Result<Batch, TransportError>;
}

/// Durable identity -> blob storage for sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn upsert(&self, user: &User, blob: &str) -> Result<(), DbError>;

    /// Read one record; a never-seen user is `DbError::UserNotFound`
    async fn read(&self, id: UserId) -> Result<StoredUser, DbError>;

    async fn enumerate(&self) -> Result<Vec<StoredUser>, DbError>;
}

/// Single entry point for every event
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn receive(&self, event: Event) -> Result<(), DispatchError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, user: &User, content: &Content) -> Result<MessageRef, TransportError> {
        (**self).send(user, content).await
    }

    async fn edit(
        &self,
        user: &User,
        message: MessageRef,
        content: &Content,
    ) -> Result<MessageRef, TransportError> {
        (**self).edit(user, message, content).await
    }

    async fn answer_interaction(&self, interaction_id: &str) -> Result<(), TransportError> {
        (**self).answer_interaction(interaction_id).await
    }

    async fn fetch_new(&self, offset: i64) -> Result<Batch, TransportError> {
        (**self).fetch_new(offset).await
    }
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn upsert(&self, user: &User, blob: &str) -> Result<(), DbError> {
        (**self).upsert(user, blob).await
    }

    async fn read(&self, id: UserId) -> Result<StoredUser, DbError> {
        (**self).read(id).await
    }

    async fn enumerate(&self) -> Result<Vec<StoredUser>, DbError> {
        (**self).enumerate().await
    }
}

#[async_trait]
impl<T: Dispatcher + ?Sized> Dispatcher for Arc<T> {
    async fn receive(&self, event: Event) -> Result<(), DispatchError> {
        (**self).receive(event).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

#[async_trait]
impl SessionStore for Database {
    async fn upsert(&self, user: &User, blob: &str) -> Result<(), DbError> {
        self.upsert_user(user, blob)
    }

    async fn read(&self, id: UserId) -> Result<StoredUser, DbError> {
        self.get_user(id)
    }

    async fn enumerate(&self) -> Result<Vec<StoredUser>, DbError> {
        self.list_users()
    }
}
