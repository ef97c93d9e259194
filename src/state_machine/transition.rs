//! Declarative transitions
//!
//! A transition is `(source, destination, predicate, callback)`. A missing
//! predicate accepts every input; a missing callback passes the input
//! through unchanged.

use crate::error::CallbackError;
use std::fmt;
use std::sync::Arc;

/// Decides whether a transition accepts `(state, input)`
pub type Predicate<C, I> = Arc<dyn Fn(&C, &str, &I) -> bool + Send + Sync>;

/// Runs when a transition fires; its output becomes the input of the next hop
pub type Callback<C, I> = Arc<dyn Fn(&mut C, I) -> Result<I, CallbackError> + Send + Sync>;

/// One rule of a transition table
pub struct Transition<C, I> {
    pub source: String,
    pub destination: String,
    pub predicate: Option<Predicate<C, I>>,
    pub callback: Option<Callback<C, I>>,
}

impl<C, I> Transition<C, I> {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            predicate: None,
            callback: None,
        }
    }

    /// Guard the transition with a predicate
    #[must_use]
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&C, &str, &I) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Run `callback` when the transition fires
    #[must_use]
    pub fn then<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut C, I) -> Result<I, CallbackError> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Run an already shared callback (e.g. one built with [`composite`])
    #[must_use]
    pub fn then_shared(mut self, callback: Callback<C, I>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn accepts(&self, ctx: &C, state: &str, input: &I) -> bool {
        self.predicate
            .as_ref()
            .map_or(true, |predicate| predicate(ctx, state, input))
    }
}

impl<C, I> Clone for Transition<C, I> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            destination: self.destination.clone(),
            predicate: self.predicate.clone(),
            callback: self.callback.clone(),
        }
    }
}

impl<C, I> fmt::Debug for Transition<C, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("guarded", &self.predicate.is_some())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Sequential application of callbacks, each receiving the previous output.
///
/// Stops at the first error.
pub fn composite<C, I>(callbacks: Vec<Callback<C, I>>) -> Callback<C, I>
where
    C: 'static,
    I: 'static,
{
    Arc::new(move |ctx: &mut C, input: I| {
        let mut arg = input;
        for callback in &callbacks {
            arg = callback(ctx, arg)?;
        }
        Ok(arg)
    })
}
