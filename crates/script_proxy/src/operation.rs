//! Pending operations and the host futures observing them
//!
//! A [`PendingOperation`] is the host half of one dynamic promise. It leaves
//! `Pending` exactly once; any later settlement is logged and ignored. The
//! writer side is a [`Completion`], the reader side a [`ScriptFuture`] or a
//! single continuation registered through [`TaskHandle`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::error::{ProxyError, ProxyResult};
use crate::value::ScriptValue;

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Observable state of a pending operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    /// Not settled yet
    Pending,
    /// Settled with a value
    Resolved,
    /// Settled with an error
    Rejected,
}

type Continuation<T> = Box<dyn FnOnce(ProxyResult<T>) + Send>;

struct Inner<T> {
    status: OperationStatus,
    /// Outcome waiting for its consumer
    slot: Option<ProxyResult<T>>,
    /// The outcome has been handed out
    observed: bool,
    waker: Option<Waker>,
    continuation: Option<Continuation<T>>,
}

/// Shared state of one pending dynamic result
pub(crate) struct PendingOperation<T> {
    member: String,
    declared: &'static str,
    inner: Mutex<Inner<T>>,
}

impl<T: Send + 'static> PendingOperation<T> {
    fn new(member: &str, status: OperationStatus, slot: Option<ProxyResult<T>>) -> Arc<Self> {
        Arc::new(Self {
            member: member.to_string(),
            declared: std::any::type_name::<T>(),
            inner: Mutex::new(Inner {
                status,
                slot,
                observed: false,
                waker: None,
                continuation: None,
            }),
        })
    }

    /// A pending operation with its future and completion sink
    pub(crate) fn channel(member: &str) -> (ScriptFuture<T>, Completion<T>) {
        let op = Self::new(member, OperationStatus::Pending, None);
        (ScriptFuture { op: op.clone() }, Completion { op })
    }

    pub(crate) fn member(&self) -> &str {
        &self.member
    }

    pub(crate) fn status(&self) -> OperationStatus {
        lock(&self.inner).status
    }

    /// Move out of `Pending`. Returns false, changing nothing, if already
    /// settled.
    pub(crate) fn settle(&self, outcome: ProxyResult<T>) -> bool {
        let mut inner = lock(&self.inner);
        if inner.status != OperationStatus::Pending {
            log::warn!(
                "[Bridge] ignoring repeated settlement of '{}' (already {:?})",
                self.member,
                inner.status
            );
            return false;
        }
        inner.status = match outcome {
            Ok(_) => OperationStatus::Resolved,
            Err(_) => OperationStatus::Rejected,
        };
        log::trace!(
            "[Bridge] '{}' -> {} settled {:?}",
            self.member,
            self.declared,
            inner.status
        );

        if let Some(continuation) = inner.continuation.take() {
            inner.observed = true;
            drop(inner);
            continuation(outcome);
            return true;
        }

        inner.slot = Some(outcome);
        let waker = inner.waker.take();
        drop(inner);
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Hand the outcome to `continuation` once it exists.
    ///
    /// A pending value has one consumer; a second one gets a protocol error.
    pub(crate) fn on_settle(&self, continuation: Continuation<T>) {
        let mut inner = lock(&self.inner);
        if let Some(outcome) = inner.slot.take() {
            inner.observed = true;
            drop(inner);
            continuation(outcome);
        } else if inner.observed || inner.continuation.is_some() {
            drop(inner);
            continuation(Err(ProxyError::protocol(
                &self.member,
                "pending value already has a consumer",
            )));
        } else {
            inner.continuation = Some(continuation);
        }
    }

    fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<ProxyResult<T>> {
        let mut inner = lock(&self.inner);
        if let Some(outcome) = inner.slot.take() {
            inner.observed = true;
            return Poll::Ready(outcome);
        }
        if inner.observed || inner.continuation.is_some() {
            return Poll::Ready(Err(ProxyError::protocol(
                &self.member,
                "pending value already has a consumer",
            )));
        }
        inner.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Writer side of a pending operation.
///
/// Dropping it while the operation is still pending fails the operation with
/// [`ProxyError::Disposed`]; that is what happens to outstanding futures when a
/// context is torn down.
pub(crate) struct Completion<T: Send + 'static> {
    op: Arc<PendingOperation<T>>,
}

impl<T: Send + 'static> Completion<T> {
    pub(crate) fn settle(&self, outcome: ProxyResult<T>) -> bool {
        self.op.settle(outcome)
    }

    pub(crate) fn member(&self) -> &str {
        self.op.member()
    }
}

impl<T: Send + 'static> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.op.status() == OperationStatus::Pending {
            log::debug!(
                "[Bridge] continuations for '{}' dropped before settling",
                self.op.member()
            );
            self.op.settle(Err(ProxyError::Disposed));
        }
    }
}

/// A host future for the result of a dynamic call.
///
/// Resolves exactly once. Dropping it detaches: the dynamic computation keeps
/// running and its result is discarded.
pub struct ScriptFuture<T> {
    op: Arc<PendingOperation<T>>,
}

impl<T: Send + 'static> ScriptFuture<T> {
    /// An already-resolved future
    pub fn ready(member: &str, value: T) -> Self {
        let op = PendingOperation::new(member, OperationStatus::Resolved, Some(Ok(value)));
        Self { op }
    }

    /// An already-failed future
    pub fn failed(member: &str, error: ProxyError) -> Self {
        let op = PendingOperation::new(member, OperationStatus::Rejected, Some(Err(error)));
        Self { op }
    }

    pub fn status(&self) -> OperationStatus {
        self.op.status()
    }

    pub fn is_settled(&self) -> bool {
        self.status() != OperationStatus::Pending
    }

    /// Name of the dynamic member this future belongs to
    pub fn member(&self) -> &str {
        self.op.member()
    }
}

impl ScriptFuture<ScriptValue> {
    /// Turn an untyped future into a task handle a runtime can store in a value
    pub fn into_task(self) -> TaskHandle {
        TaskHandle { op: self.op }
    }
}

impl<T: Send + 'static> Future for ScriptFuture<T> {
    type Output = ProxyResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.op.poll_outcome(cx)
    }
}

impl<T> fmt::Debug for ScriptFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptFuture")
            .field("member", &self.op.member)
            .field("declared", &self.op.declared)
            .finish()
    }
}

/// A host-side generic future that a runtime produced for one of its promises.
///
/// Cloning shares the same pending value; only one consumer receives it.
#[derive(Clone)]
pub struct TaskHandle {
    op: Arc<PendingOperation<ScriptValue>>,
}

impl TaskHandle {
    pub fn status(&self) -> OperationStatus {
        self.op.status()
    }

    /// Observe the task as a future
    pub fn into_future(self) -> ScriptFuture<ScriptValue> {
        ScriptFuture { op: self.op }
    }

    pub(crate) fn on_settle(&self, continuation: Continuation<ScriptValue>) {
        self.op.on_settle(continuation)
    }

    pub(crate) fn same_task(&self, other: &TaskHandle) -> bool {
        Arc::ptr_eq(&self.op, &other.op)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("member", &self.op.member)
            .field("status", &self.op.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn test_settles_exactly_once() {
        let (future, completion) = PendingOperation::<i32>::channel("square");
        assert_eq!(future.status(), OperationStatus::Pending);

        assert!(completion.settle(Ok(16)));
        assert!(!completion.settle(Ok(17)));
        assert!(!completion.settle(Err(ProxyError::Disposed)));

        assert_eq!(future.status(), OperationStatus::Resolved);
        assert_eq!(block_on(future).unwrap(), 16);
    }

    #[test]
    fn test_rejection_is_terminal() {
        let (future, completion) = PendingOperation::<i32>::channel("fail");
        completion.settle(Err(ProxyError::protocol("fail", "boom")));
        completion.settle(Ok(1));
        assert_eq!(future.status(), OperationStatus::Rejected);
        assert!(matches!(
            block_on(future),
            Err(ProxyError::AsyncBridgeProtocol { .. })
        ));
    }

    #[test]
    fn test_dropped_completion_fails_with_disposed() {
        let (future, completion) = PendingOperation::<String>::channel("slow");
        drop(completion);
        assert!(matches!(block_on(future), Err(ProxyError::Disposed)));
    }

    #[test]
    fn test_dropped_completion_after_settle_keeps_value() {
        let (future, completion) = PendingOperation::<String>::channel("quick");
        completion.settle(Ok("done".to_string()));
        drop(completion);
        assert_eq!(block_on(future).unwrap(), "done");
    }

    #[test]
    fn test_settle_wakes_waiting_thread() {
        let (future, completion) = PendingOperation::<u8>::channel("later");
        let handle = std::thread::spawn(move || block_on(future));
        std::thread::sleep(std::time::Duration::from_millis(20));
        completion.settle(Ok(9));
        assert_eq!(handle.join().unwrap().unwrap(), 9);
    }

    #[test]
    fn test_continuation_receives_outcome_once() {
        let (future, completion) = PendingOperation::<ScriptValue>::channel("task");
        let task = future.into_task();
        let (tx, rx) = std::sync::mpsc::channel();
        task.on_settle(Box::new(move |outcome| {
            tx.send(outcome.map(|v| v.as_f64())).unwrap();
        }));
        completion.settle(Ok(ScriptValue::Number(4.0)));
        assert_eq!(rx.recv().unwrap().unwrap(), Some(4.0));

        let second = task.clone().into_future();
        assert!(matches!(
            block_on(second),
            Err(ProxyError::AsyncBridgeProtocol { .. })
        ));
    }

    #[test]
    fn test_ready_future() {
        let future = ScriptFuture::ready("add", 5);
        assert!(future.is_settled());
        assert_eq!(block_on(future).unwrap(), 5);
    }
}
