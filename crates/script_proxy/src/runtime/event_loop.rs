//! Event loop for a local context
//!
//! Each context owns one thread. Host threads talk to it only through
//! [`Message`]s; everything else happens on the loop's own turns:
//!
//! 1. accept queued messages (jobs become macrotasks, wakes become polls),
//! 2. promote timers whose deadline has passed,
//! 3. run one macrotask, then drain the microtask queue,
//! 4. block until a message arrives or the next timer is due.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::realm::{Job, Realm};
use crate::config::Capabilities;
use crate::error::{HostError, HostResult};
use crate::host::ScopeJob;
use crate::value::ContextId;

/// Messages accepted by the loop
pub(crate) enum Message {
    /// Run a job on the next free turn
    Run(ScopeJob),
    /// A host task can make progress
    Wake(u64),
    /// Stop after the current turn
    Shutdown,
}

/// Start the loop thread for one context.
///
/// Returns once the engine is up on that thread, or with the reason it could
/// not start.
pub(crate) fn spawn(
    context: ContextId,
    name: &str,
    capabilities: Capabilities,
) -> HostResult<(Sender<Message>, JoinHandle<()>)> {
    let (sender, receiver) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);
    let wake_tx = sender.clone();
    let realm_name = name.to_string();

    let handle = thread::Builder::new()
        .name(format!("script-{name}"))
        .spawn(move || match Realm::new(context, realm_name, capabilities, wake_tx) {
            Ok(realm) => {
                let _ = ready_tx.send(Ok(()));
                EventLoop { realm, receiver }.run();
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e.to_string()));
            }
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok((sender, handle)),
        Ok(Err(reason)) => {
            let _ = handle.join();
            Err(HostError::Engine(reason))
        }
        Err(_) => Err(HostError::Engine("runtime thread exited during startup".into())),
    }
}

struct EventLoop {
    realm: Realm,
    receiver: Receiver<Message>,
}

impl EventLoop {
    fn run(self) {
        log::debug!("[Runtime] event loop for '{}' started", self.realm.name());

        'turns: loop {
            // Accept everything already queued
            loop {
                match self.receiver.try_recv() {
                    Ok(message) => {
                        if !self.accept(message) {
                            break 'turns;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'turns,
                }
            }

            self.realm.promote_due_timers();

            if self.realm.run_next_macrotask() {
                self.realm.drain_microtasks();
                continue;
            }

            // Idle: wait for a message or the next timer
            let message = match self.realm.next_deadline() {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match self.receiver.recv_timeout(timeout) {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.receiver.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };
            if !self.accept(message) {
                break;
            }
        }

        log::debug!(
            "[Runtime] event loop for '{}' stopped ({} pending tasks dropped)",
            self.realm.name(),
            self.realm.pending_tasks()
        );
    }

    /// Queue a message's work. Returns false on shutdown.
    fn accept(&self, message: Message) -> bool {
        match message {
            Message::Run(job) => self.realm.push_macrotask(Job::Scope(job)),
            Message::Wake(task_id) => self.realm.push_macrotask(Job::PollTask(task_id)),
            Message::Shutdown => return false,
        }
        true
    }
}
