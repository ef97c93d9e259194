//! Session cache
//!
//! Maps a user identity to its in-memory [`Session`], loading from durable
//! storage on first touch. A session is checked out for the duration of one
//! dispatch and checked back in afterwards. The cache does no per-user
//! locking of its own; the engine serializes callers per user.
//!
//! Durable storage is authoritative. Idle sessions beyond the capacity are
//! evicted, least recently used first. A [`Checkout`] dropped without being
//! released (a panic or a cancelled dispatch) forgets the user, so the next
//! checkout reloads from storage.

use super::traits::SessionStore;
use crate::db::DbError;
use crate::error::ErrorKind;
use crate::event::{User, UserId};
use crate::scheduler::AlarmScheduler;
use crate::session::{build_table, Bot, BotTable, Session};
use lru::LruCache;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("storage: {0}")]
    Store(#[from] DbError),
    #[error("corrupt session for user {user}: {source}")]
    Corrupt {
        user: UserId,
        #[source]
        source: serde_json::Error,
    },
    #[error("session for user {0} is already checked out")]
    CheckedOut(UserId),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(e) => e.kind(),
            Self::Corrupt { .. } => ErrorKind::Fatal,
            Self::CheckedOut(_) => ErrorKind::Transient,
        }
    }
}

/// In-memory sessions by recency; `None` while checked out
struct Slots<B: Bot> {
    entries: LruCache<UserId, Option<Session<B>>>,
}

impl<B: Bot> Slots<B> {
    fn idle(&self) -> usize {
        self.entries.iter().filter(|(_, s)| s.is_some()).count()
    }

    /// Drop idle sessions, least recently used first, until at most
    /// `capacity` are held
    fn evict(&mut self, capacity: usize) {
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .rev()
                .find(|(_, s)| s.is_some())
                .map(|(id, _)| *id);
            let Some(id) = oldest else {
                return;
            };
            self.entries.pop(&id);
            tracing::debug!(user = %id, "Evicted idle session");
        }
    }
}

/// A session checked out of the cache until released or dropped
pub struct Checkout<'a, B: Bot, S> {
    session: Session<B>,
    pending: Pending<'a, B, S>,
}

/// Forgets the user unless disarmed by [`SessionCache::release`]
struct Pending<'a, B: Bot, S> {
    cache: &'a SessionCache<B, S>,
    id: UserId,
    armed: bool,
}

impl<B: Bot, S> Deref for Checkout<'_, B, S> {
    type Target = Session<B>;

    fn deref(&self) -> &Session<B> {
        &self.session
    }
}

impl<B: Bot, S> DerefMut for Checkout<'_, B, S> {
    fn deref_mut(&mut self) -> &mut Session<B> {
        &mut self.session
    }
}

impl<B: Bot, S> fmt::Debug for Checkout<'_, B, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Checkout").field(&self.session).finish()
    }
}

impl<B: Bot, S> Drop for Pending<'_, B, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // The session never came back, so its in-memory state can't be trusted
        let mut slots = self.cache.slots();
        if matches!(slots.entries.peek(&self.id), Some(None)) {
            slots.entries.pop(&self.id);
        }
        tracing::warn!(user = %self.id, "Session dropped while checked out, forgetting it");
    }
}

pub struct SessionCache<B: Bot, S> {
    bot: Arc<B>,
    table: Arc<BotTable<B>>,
    store: S,
    scheduler: Arc<AlarmScheduler>,
    capacity: usize,
    slots: Mutex<Slots<B>>,
}

impl<B: Bot, S> SessionCache<B, S> {
    fn slots(&self) -> MutexGuard<'_, Slots<B>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: Bot, S: SessionStore> SessionCache<B, S> {
    pub fn new(bot: Arc<B>, store: S, scheduler: Arc<AlarmScheduler>, capacity: usize) -> Self {
        let table = build_table(bot.as_ref());
        Self {
            bot,
            table,
            store,
            scheduler,
            capacity: capacity.max(1),
            slots: Mutex::new(Slots {
                entries: LruCache::unbounded(),
            }),
        }
    }

    pub fn bot(&self) -> &Arc<B> {
        &self.bot
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Check out the session of `user`, loading and waking it on first touch
    pub async fn get(&self, user: &User) -> Result<Checkout<'_, B, S>, CacheError> {
        {
            let mut slots = self.slots();
            if let Some(entry) = slots.entries.get_mut(&user.id) {
                let session = entry.take().ok_or(CacheError::CheckedOut(user.id))?;
                return Ok(self.checkout(session));
            }
        }

        let session = match self.store.read(user.id).await {
            Ok(stored) => Session::from_blob(Arc::clone(&self.table), user.clone(), &stored.contents)
                .map_err(|source| CacheError::Corrupt {
                    user: user.id,
                    source,
                })?,
            Err(e) if e.is_not_found() => {
                tracing::info!(user = %user.id, "New user session");
                Session::new(Arc::clone(&self.table), user.clone())
            }
            Err(e) => return Err(e.into()),
        };
        self.wake(&session);

        self.slots().entries.put(user.id, None);
        Ok(self.checkout(session))
    }

    fn checkout(&self, session: Session<B>) -> Checkout<'_, B, S> {
        let id = session.user().id;
        Checkout {
            session,
            pending: Pending {
                cache: self,
                id,
                armed: true,
            },
        }
    }

    /// Serialize and durably upsert `session`
    pub async fn put(&self, session: &Session<B>) -> Result<(), CacheError> {
        let blob = session.to_blob().map_err(|source| CacheError::Corrupt {
            user: session.user().id,
            source,
        })?;
        self.store.upsert(session.user(), &blob).await?;
        Ok(())
    }

    /// Check a session back in after a dispatch
    pub fn release(&self, checkout: Checkout<'_, B, S>) {
        let Checkout {
            session,
            mut pending,
        } = checkout;
        pending.armed = false;
        drop(pending);
        let id = session.user().id;
        let mut slots = self.slots();
        slots.entries.put(id, Some(session));
        slots.evict(self.capacity);
    }

    /// Load every stored session and re-arm its alarms.
    ///
    /// Must complete before the poller and scheduler start. Corrupt records
    /// are logged and skipped. Returns the number of sessions woken.
    pub async fn load_all(&self) -> Result<usize, CacheError> {
        let stored = self.store.enumerate().await?;
        let mut woken = 0;

        for record in stored {
            let id = record.user.id;
            let table = Arc::clone(&self.table);
            let session = match Session::from_blob(table, record.user, &record.contents) {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(user = %id, error = %e, "Skipping corrupt stored session");
                    continue;
                }
            };
            self.wake(&session);
            woken += 1;

            let mut slots = self.slots();
            if slots.entries.len() < self.capacity && !slots.entries.contains(&id) {
                slots.entries.put(id, Some(session));
            }
        }

        tracing::info!(sessions = woken, "Loaded stored sessions");
        Ok(woken)
    }

    /// Sessions held in memory, idle or checked out
    pub fn len(&self) -> usize {
        self.slots().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions held in memory and not checked out
    pub fn idle(&self) -> usize {
        self.slots().idle()
    }

    fn wake(&self, session: &Session<B>) {
        for request in session.wake(&self.bot) {
            self.scheduler.set_alarm(session.user(), request);
        }
    }
}
