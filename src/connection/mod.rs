//! Connection facade.
//!
//! A [`Connection`] multiplexes request/response calls and push events over
//! one shared [`Transport`].
//!
//! # Architecture
//!
//! ```text
//!  caller tasks                     driver task                 dispatcher task
//! ┌──────────────┐   frames   ┌──────────────────────┐  jobs  ┌─────────────────┐
//! │ send / call  ├───────────►│ Transport            │        │ observer        │
//! │ send_async   │            │   │                  │        │ callbacks       │
//! │              │◄─oneshot───┤ receive loop ──┬─────┼───────►│                 │
//! │ wait_for     │◄─watch─────┤                │     │        └─────────────────┘
//! └──────────────┘            └────────────────┴─────┘
//! ```
//!
//! # State Machine
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | `Connecting` | `Open` | transport opened |
//! | `Connecting`, `Open` | `Closing` | `destroy`, last handle dropped, transport lost |
//! | any | `Closed` | teardown finished |
//!
//! `Open` is entered at most once. Reconnecting needs a new `Connection`.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use devtools_link::{Connection, ConnectionConfig};
//! use serde_json::json;
//!
//! # async fn example() -> devtools_link::Result<()> {
//! let conn = Connection::connect("ws://127.0.0.1:9222/devtools", ConnectionConfig::new()).await?;
//!
//! conn.subscribe("Page.loadEventFired", |params| {
//!     println!("loaded: {params}");
//!     Ok(())
//! });
//!
//! let status = conn.send("Browser.getVersion", json!({}), Duration::from_secs(5)).await?;
//! println!("{status}");
//!
//! conn.destroy().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::{self, Future};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{RequestId, SubscriptionId};
use crate::protocol::Request;
use crate::transport::{Transport, WebSocketTransport};

// ============================================================================
// Submodules
// ============================================================================

/// Connection configuration.
pub mod config;

/// Observer task dispatcher.
mod dispatcher;

/// Event observer registry.
mod events;

/// Receive loop.
mod receive_loop;

/// Request correlation table.
mod requests;

/// Method occurrence waiters.
mod waiters;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::ConnectionConfig;
pub use requests::AsyncOutcome;

use dispatcher::Dispatcher;
use events::{EventBus, async_callback, sync_callback};
use requests::RequestTable;
use waiters::MethodWaiters;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Transport is being opened.
    Connecting,
    /// Calls are accepted.
    Open,
    /// Teardown in progress; calls are refused.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns `true` for `Closing` and `Closed`.
    #[inline]
    #[must_use]
    pub fn is_terminating(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Shared
// ============================================================================

/// State shared by handles, the driver task and event streams.
struct Shared {
    /// Settings.
    config: ConnectionConfig,
    /// Lifecycle state.
    state: watch::Sender<ConnectionState>,
    /// Outstanding requests.
    requests: RequestTable,
    /// Event observers.
    events: EventBus,
    /// Method occurrence waiters.
    waiters: MethodWaiters,
    /// Observer callback runner.
    dispatcher: Dispatcher,
    /// Set once the transport opened.
    transport: OnceLock<Arc<dyn Transport>>,
    /// Driver task; taken by the first `destroy`.
    driver: AsyncMutex<Option<JoinHandle<()>>>,
    /// Why opening the transport failed.
    open_error: Mutex<Option<Error>>,
}

impl Shared {
    /// Creates the shared state and starts the dispatcher.
    fn new(config: ConnectionConfig) -> Self {
        let events = EventBus::new(
            config.binding_method.clone(),
            config.binding_name_key.clone(),
        );

        Self {
            requests: RequestTable::new(
                config.max_pending_requests,
                config.close_methods.iter().cloned(),
            ),
            events,
            waiters: MethodWaiters::new(),
            dispatcher: Dispatcher::start(),
            state: watch::channel(ConnectionState::Connecting).0,
            transport: OnceLock::new(),
            driver: AsyncMutex::new(None),
            open_error: Mutex::new(None),
            config,
        }
    }

    /// Returns the transport if calls are currently accepted.
    fn open_transport(&self) -> Result<Arc<dyn Transport>> {
        if *self.state.borrow() != ConnectionState::Open {
            return Err(Error::NotConnected);
        }
        self.transport.get().cloned().ok_or(Error::NotConnected)
    }

    /// Moves a live connection to `Closing`. No effect once terminating.
    fn request_shutdown(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_terminating() {
                false
            } else {
                *state = ConnectionState::Closing;
                true
            }
        })
    }

    /// Releases every blocked caller.
    fn sweep(&self) {
        let requests = self.requests.fail_all();
        let waiters = self.waiters.close_all();
        if requests + waiters > 0 {
            debug!(requests, waiters, "Released blocked callers");
        }
    }

    /// Tears down after the receive loop exits.
    async fn finish(&self, transport: Option<Arc<dyn Transport>>) {
        self.request_shutdown();
        self.sweep();

        if let Some(transport) = transport {
            match timeout(self.config.close_timeout, transport.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "Transport close failed"),
                Err(_) => warn!(
                    timeout_ms = self.config.close_timeout.as_millis() as u64,
                    "Transport close timed out"
                ),
            }
        }

        if self.state.send_replace(ConnectionState::Closed) != ConnectionState::Closed {
            info!("Connection closed");
        }
    }

    /// Body of the driver task: open, receive, tear down.
    async fn drive<F, T>(self: Arc<Self>, open: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Transport,
    {
        let mut state = self.state.subscribe();

        let opened = tokio::select! {
            biased;

            _ = state.wait_for(|s| s.is_terminating()) => None,

            result = open => match result {
                Ok(transport) => Some(Arc::new(transport) as Arc<dyn Transport>),
                Err(e) => {
                    warn!(error = %e, "Transport open failed");
                    *self.open_error.lock() = Some(e);
                    None
                }
            },
        };

        let Some(transport) = opened else {
            self.finish(None).await;
            return;
        };

        let _ = self.transport.set(Arc::clone(&transport));

        let became_open = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Open;
                true
            } else {
                false
            }
        });

        if became_open {
            info!("Connection open");
            receive_loop::run(&self, &transport).await;
        }

        self.finish(Some(transport)).await;
    }
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Owner of the shared state; dropped with the last [`Connection`] clone.
struct ConnectionHandle {
    /// Shared state.
    shared: Arc<Shared>,
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.shared.request_shutdown() {
            debug!("Last connection handle dropped, shutting down");
        }
        self.shared.dispatcher.stop();
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A request/response and event connection over one transport.
///
/// Cheap to clone; all clones share the same transport. Dropping the last
/// clone signals shutdown without waiting for it; [`Connection::destroy`]
/// is the orderly path.
///
/// Observer callbacks that capture a `Connection` keep it alive until
/// `destroy` is called.
#[derive(Clone)]
pub struct Connection {
    /// Shared owner handle.
    handle: Arc<ConnectionHandle>,
}

// ============================================================================
// Connection - Display
// ============================================================================

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Opens a WebSocket connection to `address`.
    ///
    /// Suspends until the connection is open, at most
    /// [`ConnectionConfig::open_timeout`].
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `address` is not a `ws://` or `wss://` URL
    /// - [`Error::Connection`] if the handshake fails
    /// - [`Error::ConnectTimeout`] if the open state is not reached in time
    pub async fn connect(address: &str, config: ConnectionConfig) -> Result<Self> {
        let url = Url::parse(address)
            .map_err(|e| Error::config(format!("Invalid address '{address}': {e}")))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Unsupported scheme '{}', expected ws or wss",
                url.scheme()
            )));
        }

        debug!(url = %url, "Connecting");
        Self::open_with(async move { WebSocketTransport::open(&url).await }, config).await
    }

    /// Opens a connection over the transport produced by `open`.
    ///
    /// `open` runs on the driver task. If it does not finish within
    /// [`ConnectionConfig::open_timeout`] it is dropped and the partially
    /// started connection is torn down.
    ///
    /// # Errors
    ///
    /// - the error returned by `open`
    /// - [`Error::ConnectTimeout`] if the open state is not reached in time
    pub async fn open_with<F, T>(open: F, config: ConnectionConfig) -> Result<Self>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Transport,
    {
        let open_timeout = config.open_timeout;
        let shared = Arc::new(Shared::new(config));

        let mut state = shared.state.subscribe();
        let driver = tokio::spawn(Arc::clone(&shared).drive(open));
        *shared.driver.lock().await = Some(driver);

        let connection = Self {
            handle: Arc::new(ConnectionHandle {
                shared: Arc::clone(&shared),
            }),
        };

        let reached = timeout(open_timeout, async {
            state
                .wait_for(|s| *s != ConnectionState::Connecting)
                .await
                .map(|s| *s)
        })
        .await;

        match reached {
            Ok(Ok(ConnectionState::Open)) => Ok(connection),

            Ok(_) => {
                connection.destroy().await;
                Err(shared
                    .open_error
                    .lock()
                    .take()
                    .unwrap_or(Error::ConnectionClosed))
            }

            Err(_) => {
                warn!(
                    timeout_ms = open_timeout.as_millis() as u64,
                    "Connection did not open in time"
                );
                connection.destroy().await;
                Err(Error::connect_timeout(open_timeout.as_millis() as u64))
            }
        }
    }

    /// Shuts the connection down.
    ///
    /// Closes the transport, fails every outstanding request with
    /// [`Error::ConnectionClosed`], releases every `wait_for`, joins the
    /// receive loop and stops the dispatcher. Idempotent; concurrent calls
    /// all return once teardown finished. Safe to call from an observer
    /// callback.
    pub async fn destroy(&self) {
        let shared = self.shared();

        if shared.request_shutdown() {
            debug!("Destroying connection");
        }

        {
            let mut driver = shared.driver.lock().await;
            if let Some(handle) = driver.take()
                && let Err(e) = handle.await
            {
                warn!(error = %e, "Driver task failed");
            }
        }

        shared.sweep();
        shared.state.send_replace(ConnectionState::Closed);

        if !shared.dispatcher.is_stopped() {
            info!("Connection destroyed");
        }
        shared.dispatcher.stop();
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared().state.borrow()
    }

    /// Returns `true` while calls are accepted.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns the connection settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared().config
    }

    /// Returns the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared().requests.len()
    }

    #[inline]
    fn shared(&self) -> &Arc<Shared> {
        &self.handle.shared
    }
}

// ============================================================================
// Connection - Requests
// ============================================================================

impl Connection {
    /// Sends a request and suspends until its response or `timeout`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the connection is not open (no I/O)
    /// - [`Error::TooManyPendingRequests`] if the admission limit is reached
    /// - [`Error::RequestTimeout`] if no response arrives in time
    /// - [`Error::Remote`] or [`Error::VersionMismatch`] for remote errors
    /// - [`Error::ConnectionClosed`] if the connection terminates first
    /// - the transport error if the frame could not be written
    pub async fn send(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let shared = self.shared();
        let transport = shared.open_transport()?;
        let call = shared.requests.register(method, timeout)?;

        let frame = match Request::with_id(call.id, method, params).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                shared.requests.cancel(&call.id);
                return Err(e);
            }
        };

        match timeout_at(call.deadline, transport.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                shared.requests.cancel(&call.id);
                warn!(request_id = %call.id, method, error = %e, "Request write failed");
                return Err(e);
            }
            Err(_) => {
                shared.requests.cancel(&call.id);
                return Err(Error::request_timeout(
                    call.id,
                    method,
                    timeout.as_millis() as u64,
                ));
            }
        }

        trace!(request_id = %call.id, method, "Request sent");
        shared.requests.wait(call).await
    }

    /// Sends a request with [`ConnectionConfig::command_timeout`].
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let timeout = self.shared().config.command_timeout;
        self.send(method, params, timeout).await
    }

    /// Sends a request and decodes its result into `T`.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`], plus [`Error::Json`] if the result does
    /// not match `T`.
    pub async fn send_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<T> {
        let value = self.send(method, params, timeout).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Sends a request without waiting for its response.
    ///
    /// Only the local write is awaited. The response is parked until
    /// [`Connection::collect_async`] takes it.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the connection is not open (no I/O)
    /// - [`Error::TooManyPendingRequests`] if the admission limit is reached
    /// - the transport error if the frame could not be written
    pub async fn send_async(&self, method: &str, params: Value) -> Result<RequestId> {
        let shared = self.shared();
        let transport = shared.open_transport()?;
        let id = shared.requests.register_detached(method)?;

        let frame = match Request::with_id(id, method, params).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                shared.requests.cancel(&id);
                return Err(e);
            }
        };

        let written = timeout(shared.config.command_timeout, transport.send(frame))
            .await
            .unwrap_or_else(|_| Err(Error::connection("Timed out writing request")));

        if let Err(e) = written {
            shared.requests.cancel(&id);
            warn!(request_id = %id, method, error = %e, "Request write failed");
            return Err(e);
        }

        trace!(request_id = %id, method, "Detached request sent");
        Ok(id)
    }

    /// Takes the result of a request issued with [`Connection::send_async`].
    ///
    /// Never suspends. A result can be collected once.
    #[must_use]
    pub fn collect_async(&self, id: &RequestId) -> AsyncOutcome {
        self.shared().requests.collect(id)
    }
}

// ============================================================================
// Connection - Events
// ============================================================================

impl Connection {
    /// Registers a callback for events dispatched under `method`.
    ///
    /// The callback runs on tokio's blocking pool with the event params, so
    /// it may block. Errors it returns are logged. Events that arrived before
    /// registration are not replayed.
    pub fn subscribe<F>(&self, method: &str, callback: F) -> SubscriptionId
    where
        F: Fn(Value) -> Result<()> + Send + Sync + 'static,
    {
        self.shared().events.subscribe(method, sync_callback(callback))
    }

    /// Registers an async callback for events dispatched under `method`.
    ///
    /// The returned future may suspend (for example, to issue its own
    /// request) without holding up other callbacks.
    pub fn subscribe_async<F, Fut>(&self, method: &str, callback: F) -> SubscriptionId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.shared()
            .events
            .subscribe(method, async_callback(callback))
    }

    /// Removes one registration. Returns how many were removed (0 or 1).
    pub fn unsubscribe(&self, id: SubscriptionId) -> usize {
        usize::from(self.shared().events.unsubscribe(id))
    }

    /// Removes every registration for `method`. Returns how many were
    /// removed.
    pub fn unsubscribe_all(&self, method: &str) -> usize {
        self.shared().events.unsubscribe_all(method)
    }

    /// Returns the number of registrations for `method`.
    #[must_use]
    pub fn subscriber_count(&self, method: &str) -> usize {
        self.shared().events.subscriber_count(method)
    }

    /// Returns a stream of params for events dispatched under `method`.
    ///
    /// The registration is removed when the stream is dropped.
    #[must_use]
    pub fn events(&self, method: &str) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();

        // Runs on the dispatcher task, which polls jobs in arrival order.
        let forward = async_callback(move |params| {
            let _ = tx.send(params);
            future::ready(Ok(()))
        });
        let subscription = self.shared().events.subscribe(method, forward);

        EventStream {
            rx,
            state: self.shared().state.subscribe(),
            subscription,
            shared: Arc::downgrade(self.shared()),
        }
    }

    /// Suspends until an event with `method` arrives, at most `timeout`.
    ///
    /// Returns `false` on timeout or when the connection terminates.
    pub async fn wait_for(&self, method: &str, timeout: Duration) -> bool {
        self.shared().waiters.wait_for(method, timeout).await
    }
}

// ============================================================================
// EventStream
// ============================================================================

/// Pull-based view of one event method.
///
/// Created by [`Connection::events`].
pub struct EventStream {
    /// Params delivered by the backing subscription.
    rx: mpsc::UnboundedReceiver<Value>,
    /// Connection state, to end the stream on shutdown.
    state: watch::Receiver<ConnectionState>,
    /// Backing subscription.
    subscription: SubscriptionId,
    /// Connection, for unsubscribing on drop.
    shared: Weak<Shared>,
}

impl EventStream {
    /// Receives the next event's params.
    ///
    /// Returns `None` once the connection is terminating and every event
    /// already delivered has been drained.
    pub async fn recv(&mut self) -> Option<Value> {
        if let Ok(params) = self.rx.try_recv() {
            return Some(params);
        }

        tokio::select! {
            biased;
            params = self.rx.recv() => params,
            _ = self.state.wait_for(|s| s.is_terminating()) => self.rx.try_recv().ok(),
        }
    }

    /// Returns the backing subscription.
    #[inline]
    #[must_use]
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.events.unsubscribe(self.subscription);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
