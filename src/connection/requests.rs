//! Request correlation table.
//!
//! Tracks outstanding requests by [`RequestId`] and hands each response to
//! exactly the caller that issued the request.
//!
//! # Wake-up Model
//!
//! Every blocking request owns a private `oneshot` channel. Resolving one
//! request sends on that channel only, so unrelated waiters are never
//! woken and never have to re-check their deadline.
//!
//! # Entry Lifecycle
//!
//! ```text
//! register ──► pending ──┬── resolve ──► caller (blocking request)
//!                        │          └──► completed store (detached request)
//!                        ├── deadline ──► removed, caller gets RequestTimeout
//!                        └── fail_all ──► ConnectionClosed
//! ```
//!
//! # Admission
//!
//! Blocking and detached requests are limited separately, each to
//! `max_pending`. Detached entries only leave the table when answered, so
//! unanswered `send_async` calls never starve blocking callers.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::ResponseOutcome;

// ============================================================================
// Constants
// ============================================================================

/// Deadline used when `now + timeout` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

// ============================================================================
// AsyncOutcome
// ============================================================================

/// State of a request issued with `send_async`.
#[derive(Debug)]
pub enum AsyncOutcome {
    /// Response arrived. The slot is now empty.
    Ready(Result<Value>),
    /// Request is still outstanding.
    Pending,
    /// No such request, or its result was already collected.
    Unknown,
}

impl AsyncOutcome {
    /// Returns `true` if the result is available.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns `true` if the request is still outstanding.
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

// ============================================================================
// PendingCall
// ============================================================================

/// Handle held by the caller of a blocking request.
#[derive(Debug)]
pub(crate) struct PendingCall {
    /// Correlation ID to put on the wire.
    pub(crate) id: RequestId,
    /// Remote method, for error context.
    method: String,
    /// Absolute deadline.
    pub(crate) deadline: Instant,
    /// Requested timeout, for error context.
    timeout: Duration,
    /// Private wake-up channel.
    rx: oneshot::Receiver<Result<Value>>,
}

// ============================================================================
// Internal Types
// ============================================================================

/// Who receives a response.
enum Waiter {
    /// A caller suspended in [`RequestTable::wait`].
    Caller(oneshot::Sender<Result<Value>>),
    /// Nobody yet; the result is parked for `collect`.
    Detached,
}

impl Waiter {
    fn is_detached(&self) -> bool {
        matches!(self, Self::Detached)
    }
}

/// Bookkeeping for one outstanding request.
struct PendingRequest {
    /// Remote method.
    method: String,
    /// Receiver of the response.
    waiter: Waiter,
}

/// State guarded by the table lock.
#[derive(Default)]
struct Inner {
    /// Outstanding requests.
    pending: FxHashMap<RequestId, PendingRequest>,
    /// Outstanding detached requests, a subset of `pending`.
    detached: usize,
    /// Results of detached requests awaiting collection.
    completed: FxHashMap<RequestId, Result<Value>>,
    /// Set once the connection is gone; registration is refused after.
    closed: bool,
}

impl Inner {
    /// Removes an outstanding request, keeping the detached count in step.
    fn take(&mut self, id: &RequestId) -> Option<PendingRequest> {
        let entry = self.pending.remove(id)?;
        if entry.waiter.is_detached() {
            self.detached -= 1;
        }
        Some(entry)
    }

    /// Outstanding requests of one kind.
    fn count(&self, detached: bool) -> usize {
        if detached {
            self.detached
        } else {
            self.pending.len() - self.detached
        }
    }
}

/// Absolute deadline `timeout` from now, saturating far in the future.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

// ============================================================================
// RequestTable
// ============================================================================

/// Correlation table shared by callers and the receive loop.
///
/// The lock guards structural changes only. It is never held across an
/// `.await` or while a waiter is being woken.
pub(crate) struct RequestTable {
    /// Maps and the closed flag.
    inner: Mutex<Inner>,
    /// Admission limit, per request kind.
    max_pending: usize,
    /// Methods that close the target; see [`ResponseOutcome::into_result`].
    close_methods: FxHashSet<String>,
}

impl RequestTable {
    /// Creates an empty table.
    pub(crate) fn new<I, S>(max_pending: usize, close_methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Mutex::new(Inner::default()),
            max_pending,
            close_methods: close_methods.into_iter().map(Into::into).collect(),
        }
    }

    /// Registers a blocking request.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the table was already swept
    /// - [`Error::TooManyPendingRequests`] if the admission limit is reached
    pub(crate) fn register(&self, method: &str, timeout: Duration) -> Result<PendingCall> {
        let (tx, rx) = oneshot::channel();
        let id = self.insert(method, Waiter::Caller(tx))?;

        Ok(PendingCall {
            id,
            method: method.to_string(),
            deadline: deadline_after(timeout),
            timeout,
            rx,
        })
    }

    /// Registers a detached request whose result is collected later.
    ///
    /// # Errors
    ///
    /// Same as [`RequestTable::register`].
    pub(crate) fn register_detached(&self, method: &str) -> Result<RequestId> {
        self.insert(method, Waiter::Detached)
    }

    fn insert(&self, method: &str, waiter: Waiter) -> Result<RequestId> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Err(Error::ConnectionClosed);
        }

        let detached = waiter.is_detached();
        let pending = inner.count(detached);
        if pending >= self.max_pending {
            warn!(pending, detached, max = self.max_pending, "Too many pending requests");
            return Err(Error::too_many_pending(pending, self.max_pending));
        }

        let mut id = RequestId::generate();
        while inner.pending.contains_key(&id) || inner.completed.contains_key(&id) {
            id = RequestId::generate();
        }

        inner.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                waiter,
            },
        );
        if detached {
            inner.detached += 1;
        }

        Ok(id)
    }

    /// Suspends until the request resolves or its deadline passes.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] once the deadline passes
    /// - [`Error::ConnectionClosed`] if the connection terminated first
    /// - remote errors as translated from the response
    pub(crate) async fn wait(&self, call: PendingCall) -> Result<Value> {
        let PendingCall {
            id,
            method,
            deadline,
            timeout,
            mut rx,
        } = call;

        match timeout_at(deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let removed = self.inner.lock().take(&id).is_some();
                if removed {
                    debug!(request_id = %id, method = %method, "Request timed out");
                    return Err(Error::request_timeout(id, method, timeout.as_millis() as u64));
                }

                // The entry is gone, so its sender was taken by `resolve` or
                // `fail_all` and is about to fire.
                match rx.await {
                    Ok(result) => result,
                    Err(_) => Err(Error::ConnectionClosed),
                }
            }
        }
    }

    /// Removes a request that never made it onto the wire.
    pub(crate) fn cancel(&self, id: &RequestId) {
        self.inner.lock().take(id);
    }

    /// Resolves a request from its response frame.
    ///
    /// Returns `false` if no outstanding request has this ID (unknown,
    /// timed out, or answered twice); the frame is dropped.
    pub(crate) fn resolve(&self, id: &str, outcome: ResponseOutcome) -> bool {
        let Ok(request_id) = id.parse::<RequestId>() else {
            warn!(id, "Response for unknown request");
            return false;
        };

        let mut inner = self.inner.lock();

        let Some(entry) = inner.take(&request_id) else {
            drop(inner);
            warn!(request_id = %request_id, "Response for unknown or expired request");
            return false;
        };

        let closing = self.close_methods.contains(&entry.method);
        let result = outcome.into_result(&entry.method, closing);

        match entry.waiter {
            Waiter::Caller(tx) => {
                drop(inner);
                if tx.send(result).is_err() {
                    debug!(request_id = %request_id, "Caller went away before response");
                }
            }
            Waiter::Detached => {
                inner.completed.insert(request_id, result);
            }
        }

        trace!(request_id = %request_id, method = %entry.method, "Request resolved");
        true
    }

    /// Takes the result of a detached request.
    pub(crate) fn collect(&self, id: &RequestId) -> AsyncOutcome {
        let mut inner = self.inner.lock();

        if let Some(result) = inner.completed.remove(id) {
            return AsyncOutcome::Ready(result);
        }

        match inner.pending.get(id) {
            Some(PendingRequest {
                waiter: Waiter::Detached,
                ..
            }) => AsyncOutcome::Pending,
            _ => AsyncOutcome::Unknown,
        }
    }

    /// Fails every outstanding request with [`Error::ConnectionClosed`] and
    /// refuses further registration.
    ///
    /// Returns the number of requests failed. Safe to call repeatedly.
    pub(crate) fn fail_all(&self) -> usize {
        let callers: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.detached = 0;

            let drained: Vec<_> = inner.pending.drain().collect();
            let mut callers = Vec::with_capacity(drained.len());

            for (id, entry) in drained {
                match entry.waiter {
                    Waiter::Caller(tx) => callers.push(tx),
                    Waiter::Detached => {
                        inner.completed.insert(id, Err(Error::ConnectionClosed));
                    }
                }
            }

            callers
        };

        let count = callers.len();
        for tx in callers {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }

        count
    }

    /// Returns the number of outstanding requests.
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::task::Poll;

    use serde_json::json;

    use crate::protocol::ErrorInfo;

    fn ok(value: Value) -> ResponseOutcome {
        ResponseOutcome::Result(value)
    }

    fn table(max_pending: usize) -> RequestTable {
        RequestTable::new(max_pending, ["Page.close"])
    }

    fn error(message: &str) -> ResponseOutcome {
        ResponseOutcome::Error(ErrorInfo {
            message: message.into(),
            ..ErrorInfo::default()
        })
    }

    #[tokio::test]
    async fn test_resolve_wakes_caller() {
        let table = table(10);
        let call = table.register("A.b", Duration::from_secs(5)).expect("register");
        let id = call.id.to_string();

        assert!(table.resolve(&id, ok(json!({"ok": true}))));
        let result = table.wait(call).await.expect("result");
        assert_eq!(result, json!({"ok": true}));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let table = Arc::new(table(10));
        let first = table.register("A.first", Duration::from_secs(5)).expect("register");
        let second = table.register("A.second", Duration::from_secs(5)).expect("register");
        let first_id = first.id.to_string();
        let second_id = second.id.to_string();

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.wait(first).await })
        };

        assert!(table.resolve(&second_id, ok(json!(2))));
        assert!(table.resolve(&first_id, ok(json!(1))));

        assert_eq!(table.wait(second).await.expect("second"), json!(2));
        assert_eq!(waiter.await.expect("join").expect("first"), json!(1));
    }

    #[tokio::test]
    async fn test_resolving_other_request_does_not_wake() {
        let table = table(10);
        let a = table.register("A", Duration::from_secs(5)).expect("register");
        let b = table.register("B", Duration::from_secs(5)).expect("register");
        let a_id = a.id.to_string();
        let b_id = b.id.to_string();

        let mut wait_a = tokio_test::task::spawn(table.wait(a));
        tokio_test::assert_pending!(wait_a.poll());

        assert!(table.resolve(&b_id, ok(json!("b"))));
        assert!(!wait_a.is_woken());

        assert!(table.resolve(&a_id, ok(json!("a"))));
        assert!(wait_a.is_woken());
        match wait_a.poll() {
            Poll::Ready(Ok(value)) => assert_eq!(value, json!("a")),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(table.wait(b).await.expect("b"), json!("b"));
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let table = table(10);
        let call = table.register("Slow.op", Duration::from_millis(30)).expect("register");
        let id = call.id.to_string();

        let started = Instant::now();
        let err = table.wait(call).await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(matches!(err, Error::RequestTimeout { ref method, .. } if method == "Slow.op"));
        assert_eq!(table.len(), 0);

        // Late response is dropped.
        assert!(!table.resolve(&id, ok(json!(1))));
    }

    #[tokio::test]
    async fn test_duplicate_response_dropped() {
        let table = table(10);
        let call = table.register("A.b", Duration::from_secs(5)).expect("register");
        let id = call.id.to_string();

        assert!(table.resolve(&id, ok(json!(1))));
        assert!(!table.resolve(&id, ok(json!(2))));
        assert_eq!(table.wait(call).await.expect("result"), json!(1));
    }

    #[tokio::test]
    async fn test_remote_error_translated() {
        let table = table(10);
        let call = table.register("Page.nope", Duration::from_secs(5)).expect("register");
        let id = call.id.to_string();

        assert!(table.resolve(&id, error("'Page.nope' wasn't found")));
        let err = table.wait(call).await.unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { .. }));
    }

    #[test]
    fn test_unknown_and_malformed_ids() {
        let table = table(10);
        assert!(!table.resolve("not-a-uuid", ok(Value::Null)));
        assert!(!table.resolve(&RequestId::generate().to_string(), ok(Value::Null)));
    }

    #[test]
    fn test_detached_collect() {
        let table = table(10);
        let id = table.register_detached("A.b").expect("register");

        assert!(table.collect(&id).is_pending());
        assert!(table.resolve(&id.to_string(), ok(json!("done"))));

        match table.collect(&id) {
            AsyncOutcome::Ready(Ok(value)) => assert_eq!(value, json!("done")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(table.collect(&id), AsyncOutcome::Unknown));
        assert!(matches!(
            table.collect(&RequestId::generate()),
            AsyncOutcome::Unknown
        ));
    }

    #[test]
    fn test_admission_limit() {
        let table = table(2);
        let _a = table.register("A", Duration::from_secs(1)).expect("a");
        let _b = table.register("B", Duration::from_secs(1)).expect("b");
        let err = table.register("C", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::TooManyPendingRequests { pending: 2, max: 2 }));
    }

    #[test]
    fn test_unanswered_detached_requests_do_not_block_callers() {
        let table = table(2);
        let first = table.register_detached("A").expect("a");
        let _second = table.register_detached("B").expect("b");

        let err = table.register_detached("C").unwrap_err();
        assert!(matches!(err, Error::TooManyPendingRequests { pending: 2, max: 2 }));

        let call = table.register("D", Duration::from_secs(1)).expect("blocking still admitted");
        table.cancel(&call.id);

        assert!(table.resolve(&first.to_string(), ok(json!(1))));
        table.register_detached("E").expect("slot freed by response");
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let table = table(10);
        let call = table.register("A.b", Duration::MAX).expect("register");
        let id = call.id.to_string();

        assert!(table.resolve(&id, ok(json!("done"))));
        assert_eq!(table.wait(call).await.expect("result"), json!("done"));
    }

    #[tokio::test]
    async fn test_response_taken_before_deadline_is_delivered() {
        let table = table(10);
        let call = table.register("A.b", Duration::ZERO).expect("register");

        // What `resolve` does between releasing the lock and sending.
        let entry = table.inner.lock().take(&call.id).expect("entry");
        let Waiter::Caller(tx) = entry.waiter else {
            panic!("expected a blocking caller");
        };
        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(Ok(json!("raced")));
        });

        assert_eq!(table.wait(call).await.expect("result"), json!("raced"));
        sender.await.expect("join");
    }

    #[tokio::test]
    async fn test_target_closed_is_success_only_for_close_methods() {
        let table = table(10);

        let close = table.register("Page.close", Duration::from_secs(5)).expect("register");
        assert!(table.resolve(&close.id.to_string(), error("Target closed")));
        assert_eq!(table.wait(close).await.expect("benign"), json!({}));

        let other = table.register("Runtime.evaluate", Duration::from_secs(5)).expect("register");
        assert!(table.resolve(&other.id.to_string(), error("Target closed")));
        let err = table.wait(other).await.unwrap_err();
        assert!(matches!(err, Error::Remote { ref message } if message == "Target closed"));
    }

    #[tokio::test]
    async fn test_fail_all_sweeps_everything() {
        let table = table(10);
        let call = table.register("A", Duration::from_secs(30)).expect("register");
        let detached = table.register_detached("B").expect("register");

        assert_eq!(table.fail_all(), 1);
        assert_eq!(table.fail_all(), 0);

        assert!(matches!(table.wait(call).await, Err(Error::ConnectionClosed)));
        assert!(matches!(
            table.collect(&detached),
            AsyncOutcome::Ready(Err(Error::ConnectionClosed))
        ));
        assert!(matches!(
            table.register("C", Duration::from_secs(1)),
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_cancel() {
        let table = table(10);
        let call = table.register("A", Duration::from_secs(1)).expect("register");
        table.cancel(&call.id);
        assert_eq!(table.len(), 0);
    }
}
