//! Dedicated thread that owns the server connection.
//!
//! Jobs are boxed closures posted over a channel. The posting thread blocks
//! on a completion slot until the worker fills it. If a job is dropped
//! without running (the worker died or was stopped first) the slot is marked
//! abandoned, so a waiting caller always wakes up.

use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use super::engine::{Host, TeardownReport};
use crate::server::ServerFactory;

type Job = Box<dyn FnOnce(&mut Host) + Send>;

enum Message {
    Job(Job),
    /// Stop after the jobs already queued.
    Finish,
}

enum Slot<R> {
    Pending,
    Done(R),
    Abandoned,
}

struct Completion<R> {
    slot: Mutex<Slot<R>>,
    signal: Condvar,
}

impl<R> Completion<R> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            signal: Condvar::new(),
        }
    }

    fn settle(&self, outcome: Slot<R>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = outcome;
            self.signal.notify_all();
        }
    }

    /// Block until the job ran (`Some`) or was dropped (`None`).
    fn wait(&self) -> Option<R> {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.signal.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Abandoned) {
            Slot::Done(value) => Some(value),
            _ => None,
        }
    }
}

/// Marks the completion abandoned unless it was filled first.
struct CompletionGuard<R>(Arc<Completion<R>>);

impl<R> CompletionGuard<R> {
    fn complete(self, value: R) {
        self.0.settle(Slot::Done(value));
    }
}

impl<R> Drop for CompletionGuard<R> {
    fn drop(&mut self) {
        self.0.settle(Slot::Abandoned);
    }
}

pub(crate) struct Worker {
    sender: mpsc::Sender<Message>,
    thread: Option<JoinHandle<TeardownReport>>,
}

impl Worker {
    /// Start the thread. The server is built on it, at the first connect.
    pub(crate) fn spawn(name: &str, factory: ServerFactory) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Message>();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                tracing::debug!("automation worker started");
                let mut host = Host::new(factory);
                while let Ok(message) = receiver.recv() {
                    match message {
                        Message::Job(job) => job(&mut host),
                        Message::Finish => break,
                    }
                }
                // Anything still queued is dropped here, abandoning its slot.
                drop(receiver);
                let report = host.teardown();
                tracing::debug!("automation worker stopped");
                report
            })?;
        Ok(Self {
            sender,
            thread: Some(thread),
        })
    }

    /// Run `f` on the worker and wait for its result. `None` if the worker
    /// is gone.
    pub(crate) fn submit<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Host) -> R + Send + 'static,
    {
        let completion = Arc::new(Completion::new());
        let guard = CompletionGuard(Arc::clone(&completion));
        let job: Job = Box::new(move |host| guard.complete(f(host)));
        self.sender.send(Message::Job(job)).ok()?;
        completion.wait()
    }

    /// Ask the worker to stop once the current request is done.
    pub(crate) fn finish(&self) {
        let _ = self.sender.send(Message::Finish);
    }

    /// Stop the worker and wait for it to exit. Returns what the worker's
    /// own teardown released, which is empty if the engine was already torn
    /// down by a job.
    pub(crate) fn join(mut self) -> TeardownReport {
        self.stop().unwrap_or_default()
    }

    fn stop(&mut self) -> Option<TeardownReport> {
        self.finish();
        let thread = self.thread.take()?;
        if thread.thread().id() == thread::current().id() {
            return None;
        }
        match thread.join() {
            Ok(report) => Some(report),
            Err(_) => {
                tracing::error!("automation worker panicked");
                None
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
