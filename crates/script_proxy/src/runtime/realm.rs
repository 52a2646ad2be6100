//! The realm: one QuickJS context plus the host queues that drive it
//!
//! QuickJS owns objects, promises and the microtask queue. The realm owns
//! everything QuickJS leaves to its embedder: macrotasks, timers and host
//! futures. [`RealmState`] is shared with the native functions installed in
//! the context, so it lives behind an `Rc` and uses interior mutability.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::mpsc::Sender;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use rquickjs::{Context, Ctx, Function, Object, Persistent, Runtime};

use super::event_loop::Message;
use super::scope::JsScope;
use super::waker::TaskWaker;
use crate::config::Capabilities;
use crate::host::{LocalTask, Scope, ScopeJob};
use crate::value::ContextId;

/// Host support installed into every context
const PRELUDE: &str = include_str!("prelude.js");

/// Longest timer delay accepted from script code, in milliseconds
const MAX_TIMER_DELAY_MS: f64 = 2_147_483_647.0;

/// Work queued on a realm
pub(crate) enum Job {
    Scope(ScopeJob),
    /// A `setTimeout` callback registered by script code
    Timer(u64),
    PollTask(u64),
}

struct Timer {
    due: Instant,
    seq: u64,
    job: Job,
}

/// Realm data reachable from native functions
pub(crate) struct RealmState {
    pub(super) context: ContextId,
    pub(super) name: String,
    pub(super) capabilities: Capabilities,
    prelude: RefCell<Option<Persistent<Object<'static>>>>,
    macrotasks: RefCell<VecDeque<Job>>,
    timers: RefCell<Vec<Timer>>,
    next_timer: Cell<u64>,
    /// Host futures waiting to be woken
    tasks: RefCell<HashMap<u64, LocalTask>>,
    next_task: Cell<u64>,
    wake_tx: Sender<Message>,
}

impl RealmState {
    /// The host helper object, `None` once the realm is torn down
    pub(super) fn prelude<'js>(&self, ctx: &Ctx<'js>) -> Option<Object<'js>> {
        let prelude = self.prelude.borrow().clone()?;
        prelude.restore(ctx).ok()
    }

    pub(super) fn push_macrotask(&self, job: Job) {
        self.macrotasks.borrow_mut().push_back(job);
    }

    pub(super) fn add_timer(&self, delay: Duration, job: Job) {
        let seq = self.next_timer.get();
        self.next_timer.set(seq + 1);
        self.timers.borrow_mut().push(Timer {
            due: Instant::now() + delay,
            seq,
            job,
        });
    }

    pub(super) fn spawn(&self, task: LocalTask) {
        let task_id = self.next_task.get();
        self.next_task.set(task_id + 1);
        self.tasks.borrow_mut().insert(task_id, task);
        self.push_macrotask(Job::PollTask(task_id));
    }

    /// Drop every reference into the context so the runtime can be freed
    fn teardown(&self) {
        self.prelude.borrow_mut().take();
        self.macrotasks.borrow_mut().clear();
        self.timers.borrow_mut().clear();
        self.tasks.borrow_mut().clear();
    }
}

pub(crate) struct Realm {
    state: Rc<RealmState>,
    context: Context,
    runtime: Runtime,
}

impl Realm {
    pub(crate) fn new(
        context: ContextId,
        name: impl Into<String>,
        capabilities: Capabilities,
        wake_tx: Sender<Message>,
    ) -> rquickjs::Result<Self> {
        let runtime = Runtime::new()?;
        let js = Context::full(&runtime)?;
        let state = Rc::new(RealmState {
            context,
            name: name.into(),
            capabilities,
            prelude: RefCell::new(None),
            macrotasks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Vec::new()),
            next_timer: Cell::new(0),
            tasks: RefCell::new(HashMap::new()),
            next_task: Cell::new(0),
            wake_tx,
        });

        js.with(|ctx| -> rquickjs::Result<()> {
            let init: Function = ctx.eval(PRELUDE)?;
            let timers = Rc::downgrade(&state);
            let schedule = Function::new(ctx.clone(), move |id: f64, delay: f64| {
                let Some(state) = timers.upgrade() else {
                    return;
                };
                let millis = if delay.is_finite() && delay > 0.0 {
                    delay.min(MAX_TIMER_DELAY_MS)
                } else {
                    0.0
                };
                state.add_timer(Duration::from_secs_f64(millis / 1000.0), Job::Timer(id as u64));
            })?;
            let prelude: Object = init.call((schedule,))?;
            *state.prelude.borrow_mut() = Some(Persistent::save(&ctx, prelude));
            Ok(())
        })?;

        log::trace!("[Runtime] realm '{}' ({}) initialized", state.name, context);
        Ok(Self {
            state,
            context: js,
            runtime,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.state.name
    }

    /// Run `f` against a scope over this realm's context
    pub(crate) fn with_scope<R>(&self, f: impl FnOnce(&mut dyn Scope) -> R) -> R {
        let state = self.state.clone();
        self.context.with(move |ctx| {
            let mut scope = JsScope::new(ctx, state);
            f(&mut scope)
        })
    }

    // ------------------------------------------------------------------
    // Turns
    // ------------------------------------------------------------------

    pub(crate) fn push_macrotask(&self, job: Job) {
        self.state.push_macrotask(job);
    }

    /// Run the oldest macrotask. Returns false when there was none.
    pub(crate) fn run_next_macrotask(&self) -> bool {
        let job = self.state.macrotasks.borrow_mut().pop_front();
        match job {
            Some(job) => {
                self.run_job(job);
                true
            }
            None => false,
        }
    }

    /// Run promise jobs until QuickJS has none left
    pub(crate) fn drain_microtasks(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => log::warn!("[Runtime] a promise job in '{}' threw", self.state.name),
            }
        }
    }

    fn run_job(&self, job: Job) {
        match job {
            Job::Scope(job) => self.with_scope(job),
            Job::Timer(id) => {
                let state = self.state.clone();
                self.context.with(move |ctx| {
                    let scope = JsScope::new(ctx, state);
                    if let Err(e) = scope.fire_timer(id) {
                        log::warn!("[Runtime] timer {} in '{}' threw: {}", id, scope.name(), e);
                    }
                });
            }
            Job::PollTask(task_id) => self.poll_task(task_id),
        }
    }

    /// Move timers whose deadline has passed onto the macrotask queue, in
    /// deadline order
    pub(crate) fn promote_due_timers(&self) {
        let now = Instant::now();
        let mut due = {
            let mut timers = self.state.timers.borrow_mut();
            if timers.is_empty() {
                return;
            }
            let (due, pending): (Vec<Timer>, Vec<Timer>) =
                std::mem::take(&mut *timers).into_iter().partition(|t| t.due <= now);
            *timers = pending;
            due
        };
        due.sort_by_key(|t| (t.due, t.seq));
        for timer in due {
            self.state.push_macrotask(timer.job);
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.state.timers.borrow().iter().map(|t| t.due).min()
    }

    pub(crate) fn pending_tasks(&self) -> usize {
        self.state.tasks.borrow().len()
    }

    fn poll_task(&self, task_id: u64) {
        // completed tasks can still receive stale wakes
        let Some(mut task) = self.state.tasks.borrow_mut().remove(&task_id) else {
            return;
        };
        let waker = TaskWaker::new(task_id, self.state.wake_tx.clone());
        let mut cx = TaskContext::from_waker(&waker);
        match task.as_mut().poll(&mut cx) {
            Poll::Ready(job) => self.with_scope(job),
            Poll::Pending => {
                self.state.tasks.borrow_mut().insert(task_id, task);
            }
        }
    }

    /// Run queued work until nothing is left to do without waiting: timers
    /// that are not yet due stay queued, and pending host tasks are polled
    /// until none of them makes progress.
    #[cfg(test)]
    pub(crate) fn run_until_idle(&self) {
        loop {
            self.drain_microtasks();
            self.promote_due_timers();
            if self.run_next_macrotask() {
                continue;
            }
            let before = self.pending_tasks();
            let ids: Vec<u64> = self.state.tasks.borrow().keys().copied().collect();
            for id in ids {
                self.poll_task(id);
            }
            self.drain_microtasks();
            if self.pending_tasks() == before && self.state.macrotasks.borrow().is_empty() {
                break;
            }
        }
    }
}

impl Drop for Realm {
    fn drop(&mut self) {
        self.state.teardown();
    }
}
