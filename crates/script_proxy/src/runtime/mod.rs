//! Local runtime backed by QuickJS
//!
//! Every context is a QuickJS runtime with its own event loop on a dedicated
//! thread. Library code is JavaScript source (script, CommonJS or ES module)
//! or a [`NativeLibrary`](crate::NativeLibrary) built in Rust; both see the
//! same `require`, `setTimeout` and `clearTimeout` globals.
//!
//! # Example
//!
//! ```rust,ignore
//! use script_proxy::{Capabilities, ContextExt, LocalEngine, ScriptEngine};
//!
//! let context = LocalEngine::new().create_context("demo", &Capabilities::default())?;
//! let answer = context.run(|scope| scope.to_number(&"42".into()))?;
//! context.dispose();
//! ```

mod event_loop;
mod realm;
mod scope;
mod waker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use crate::config::Capabilities;
use crate::error::{HostError, HostResult};
use crate::host::{ScopeJob, ScriptContext, ScriptEngine};
use crate::operation::lock;
use crate::value::ContextId;

use event_loop::Message;
#[cfg(test)]
pub(crate) use realm::Realm;

/// Engine that runs each context on its own thread
#[derive(Debug, Default, Clone)]
pub struct LocalEngine;

impl LocalEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for LocalEngine {
    fn create_context(
        &self,
        name: &str,
        capabilities: &Capabilities,
    ) -> HostResult<Arc<dyn ScriptContext>> {
        Ok(Arc::new(LocalContext::start(name, capabilities)?))
    }
}

/// Handle to a context running on a local event loop thread
pub struct LocalContext {
    id: ContextId,
    name: String,
    sender: Mutex<Option<Sender<Message>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    disposed: AtomicBool,
}

impl LocalContext {
    /// Start a context and its event loop
    pub fn start(name: &str, capabilities: &Capabilities) -> HostResult<Self> {
        let id = ContextId::next();
        let (sender, thread) = event_loop::spawn(id, name, capabilities.clone())?;
        log::debug!("[Runtime] context '{}' ({}) started", name, id);

        Ok(Self {
            id,
            name: name.to_string(),
            thread_id: thread.thread().id(),
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
            disposed: AtomicBool::new(false),
        })
    }
}

impl ScriptContext for LocalContext {
    fn id(&self) -> ContextId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, job: ScopeJob) -> HostResult<()> {
        if self.is_disposed() {
            return Err(HostError::ContextDisposed(self.name.clone()));
        }
        match lock(&self.sender).as_ref() {
            Some(sender) => sender
                .send(Message::Run(job))
                .map_err(|_| HostError::ContextDisposed(self.name.clone())),
            None => Err(HostError::ContextDisposed(self.name.clone())),
        }
    }

    fn on_runtime_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(sender) = lock(&self.sender).take() {
            // the loop may already be gone
            let _ = sender.send(Message::Shutdown);
        }
        let thread = lock(&self.thread).take();
        if let Some(thread) = thread {
            if self.on_runtime_thread() {
                // the loop exits after the current turn
                drop(thread);
            } else if thread.join().is_err() {
                log::warn!("[Runtime] event loop of '{}' panicked", self.name);
            }
        }
        log::debug!("[Runtime] context '{}' disposed", self.name);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for LocalContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A realm with no event loop behind it, driven by hand
#[cfg(test)]
pub(crate) fn test_realm() -> Realm {
    let (wake_tx, _) = std::sync::mpsc::channel();
    Realm::new(ContextId::next(), "test", Capabilities::default(), wake_tx)
        .expect("QuickJS realm should start")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ContextExt;
    use crate::module::ScriptSource;
    use crate::value::ScriptValue;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn context(name: &str) -> Arc<dyn ScriptContext> {
        LocalEngine::new()
            .create_context(name, &Capabilities::default())
            .unwrap()
    }

    #[test]
    fn test_run_returns_job_result() {
        let context = context("run");
        let n = context
            .run(|scope| scope.to_number(&ScriptValue::from("0x10")))
            .unwrap();
        assert_eq!(n, 16.0);
        assert!(!context.on_runtime_thread());
        context.dispose();
    }

    #[test]
    fn test_state_survives_between_jobs() {
        let context = context("state");
        context
            .run(|scope| scope.set_global("answer", ScriptValue::from(42)))
            .unwrap();
        let answer = context.run(|scope| scope.global("answer")).unwrap();
        assert_eq!(answer, ScriptValue::from(42));
    }

    #[test]
    fn test_blocking_call_from_runtime_thread_is_reentrant() {
        let context = context("reentrant");
        let inner = context.clone();
        let result = context
            .run(move |_scope| inner.run(|_| ()).map_err(|e| e.to_string()))
            .unwrap();
        assert!(result.unwrap_err().contains("Re-entrant"));
    }

    #[test]
    fn test_submit_after_dispose_fails() {
        let context = context("disposed");
        context.dispose();
        context.dispose();
        assert!(context.is_disposed());
        assert!(matches!(
            context.run(|_| ()),
            Err(HostError::ContextDisposed(_))
        ));
    }

    #[test]
    fn test_timers_fire_on_the_loop() {
        let context = context("timers");
        let (tx, rx) = mpsc::channel();
        context
            .submit(Box::new(move |scope| {
                let late = tx.clone();
                scope.set_timeout(
                    Duration::from_millis(20),
                    Box::new(move |_| {
                        let _ = late.send("late");
                    }),
                );
                scope.set_timeout(
                    Duration::from_millis(1),
                    Box::new(move |_| {
                        let _ = tx.send("early");
                    }),
                );
            }))
            .unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((first, second), ("early", "late"));
    }

    #[test]
    fn test_script_timers_fire_on_the_loop() {
        let context = context("script-timers");
        context
            .run(|scope| {
                let source = "globalThis.fired = 0; setTimeout(() => { fired += 1 }, 5);";
                scope
                    .execute(ScriptSource::Text(source.into()))
                    .map(|_| ())
                    .map_err(|e| e.message)
            })
            .unwrap()
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let fired = context
                .run(|scope| {
                    let fired = scope.global("fired");
                    scope.to_number(&fired)
                })
                .unwrap();
            if fired == 1.0 {
                break;
            }
            assert!(Instant::now() < deadline, "script timer never fired");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_host_task_wakes_from_another_thread() {
        let context = context("wake");
        let (gate_tx, gate_rx) = futures::channel::oneshot::channel::<f64>();
        let (done_tx, done_rx) = mpsc::channel();

        context
            .submit(Box::new(move |scope| {
                scope.spawn(Box::pin(async move {
                    let value = gate_rx.await.unwrap_or(f64::NAN);
                    let job: ScopeJob = Box::new(move |scope| {
                        let text = scope.to_display_string(&ScriptValue::from(value));
                        let _ = done_tx.send(text);
                    });
                    job
                }));
            }))
            .unwrap();

        thread::sleep(Duration::from_millis(10));
        gate_tx.send(2.5).unwrap();
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), "2.5");
    }
}
