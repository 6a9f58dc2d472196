//! Event observer registry.
//!
//! Maps a dispatch key to an ordered list of callbacks. Publishing an event
//! never runs a callback in place: each one is handed to the
//! [`Dispatcher`] as an independent job.
//!
//! # Binding Events
//!
//! One event method (`Runtime.bindingCalled` unless configured otherwise)
//! is dispatched by the binding name found in its params instead of by
//! its method:
//!
//! ```json
//! { "method": "Runtime.bindingCalled", "params": { "name": "onReady", "payload": "..." } }
//! ```
//!
//! reaches observers subscribed to `"onReady"`. If the name is missing the
//! method itself is used. No other method is treated this way.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::panic;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::task;
use tracing::{debug, trace};

use crate::error::Result;
use crate::identifiers::SubscriptionId;
use crate::protocol::Event;

use super::dispatcher::{Dispatcher, Job};

// ============================================================================
// Types
// ============================================================================

/// Observer callback.
///
/// Invoked with the event params; the returned future runs on the
/// dispatcher task.
pub(crate) type EventCallback = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wraps a synchronous closure as an [`EventCallback`].
///
/// The closure runs on tokio's blocking pool, so it may block without
/// stalling the dispatcher or the receive loop. A panic is re-raised in the
/// job so the dispatcher contains it like any other.
pub(crate) fn sync_callback<F>(callback: F) -> EventCallback
where
    F: Fn(Value) -> Result<()> + Send + Sync + 'static,
{
    let callback = Arc::new(callback);
    Arc::new(move |params: Value| -> BoxFuture<'static, Result<()>> {
        let callback = Arc::clone(&callback);
        Box::pin(async move {
            match task::spawn_blocking(move || callback(params)).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    debug!(error = %e, "Blocking observer cancelled");
                    Ok(())
                }
            }
        })
    })
}

/// Wraps an async closure as an [`EventCallback`].
pub(crate) fn async_callback<F, Fut>(callback: F) -> EventCallback
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |params: Value| -> BoxFuture<'static, Result<()>> { Box::pin(callback(params)) })
}

/// One registered observer.
struct Registration {
    /// Handle returned to the subscriber.
    id: SubscriptionId,
    /// The callback.
    callback: EventCallback,
}

// ============================================================================
// EventBus
// ============================================================================

/// Registry of event observers.
pub(crate) struct EventBus {
    /// Observers by dispatch key, in registration order.
    observers: RwLock<FxHashMap<String, Vec<Registration>>>,
    /// Method dispatched by binding name.
    binding_method: String,
    /// Params key holding the binding name.
    binding_name_key: String,
}

impl EventBus {
    /// Creates an empty registry.
    pub(crate) fn new(binding_method: impl Into<String>, binding_name_key: impl Into<String>) -> Self {
        Self {
            observers: RwLock::new(FxHashMap::default()),
            binding_method: binding_method.into(),
            binding_name_key: binding_name_key.into(),
        }
    }

    /// Appends an observer for `key`.
    ///
    /// Registering the same callback twice yields two registrations.
    pub(crate) fn subscribe(&self, key: &str, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.observers
            .write()
            .entry(key.to_string())
            .or_default()
            .push(Registration { id, callback });

        trace!(key, subscription = %id, "Observer registered");
        id
    }

    /// Removes one registration. Returns `false` if it was not found.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();

        let mut emptied = None;
        let mut found = false;

        for (key, registrations) in observers.iter_mut() {
            if let Some(index) = registrations.iter().position(|r| r.id == id) {
                registrations.remove(index);
                found = true;
                if registrations.is_empty() {
                    emptied = Some(key.clone());
                }
                break;
            }
        }

        if let Some(key) = emptied {
            observers.remove(&key);
        }

        found
    }

    /// Removes every registration for `key`. Returns how many were removed.
    pub(crate) fn unsubscribe_all(&self, key: &str) -> usize {
        self.observers
            .write()
            .remove(key)
            .map_or(0, |registrations| registrations.len())
    }

    /// Returns the number of registrations for `key`.
    pub(crate) fn subscriber_count(&self, key: &str) -> usize {
        self.observers.read().get(key).map_or(0, Vec::len)
    }

    /// Returns the key observers of `event` are registered under.
    pub(crate) fn dispatch_key<'a>(&self, event: &'a Event) -> &'a str {
        if event.method == self.binding_method
            && let Some(name) = event.get_str(&self.binding_name_key)
        {
            return name;
        }
        &event.method
    }

    /// Schedules every observer of `event` on the dispatcher.
    ///
    /// Returns the number of jobs submitted. Never waits on a callback.
    pub(crate) fn publish(&self, event: Event, dispatcher: &Dispatcher) -> usize {
        let key = self.dispatch_key(&event);

        let callbacks: Vec<EventCallback> = match self.observers.read().get(key) {
            Some(registrations) => registrations
                .iter()
                .map(|r| Arc::clone(&r.callback))
                .collect(),
            None => return 0,
        };

        let key = key.to_string();
        let mut submitted = 0;

        for callback in callbacks {
            let params = event.params.clone();
            let job = Job {
                method: key.clone(),
                task: Box::pin(async move { callback(params).await }),
            };
            if dispatcher.submit(job) {
                submitted += 1;
            }
        }

        trace!(key = %key, submitted, "Event published");
        submitted
    }
}

// ============================================================================
// Tests
// ============================================================================
