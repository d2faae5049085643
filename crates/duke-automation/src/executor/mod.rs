//! Request execution.
//!
//! The [`Executor`] runs engine jobs either inline on the caller's thread or
//! on a dedicated worker that owns the server connection. Both modes present
//! the same blocking contract. On top of that it applies the call-boundary
//! policy: refuse calls while aborted, allow one request at a time, classify
//! failures into [`CallError`]s, move the session state, and notify the
//! error observer.

pub mod engine;
mod worker;

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use dispatch_protocol::{status, Handle, WireValue};

use crate::config::{FailureClass, FailureClassifier, ProxyConfig};
use crate::error::{CallError, ServerError};
use crate::marshal::WireArgs;
use crate::path::MemberPath;
use crate::server::ServerFactory;
use crate::state::{ErrorObserver, ErrorReport, ProxyStatus};

pub use engine::{Engine, EngineError, Host, TeardownReport};
use worker::Worker;

/// What a request does with its terminal segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Get,
    Put,
    Call,
}

/// One get, put, or call against a member path.
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: RequestKind,
    /// Object the path is rooted at; `Handle::NONE` for the root.
    pub target: Handle,
    pub path: MemberPath,
    /// Positional arguments after any literal arguments of the last segment.
    pub args: WireArgs,
    /// Value to write, for `Put`.
    pub value: WireValue,
}

impl Request {
    pub fn get(target: Handle, path: MemberPath) -> Self {
        Self {
            kind: RequestKind::Get,
            target,
            path,
            args: WireArgs::new(),
            value: WireValue::Empty,
        }
    }

    pub fn put(target: Handle, path: MemberPath, value: WireValue) -> Self {
        Self {
            kind: RequestKind::Put,
            value,
            ..Self::get(target, path)
        }
    }

    pub fn call(target: Handle, path: MemberPath, args: WireArgs) -> Self {
        Self {
            kind: RequestKind::Call,
            args,
            ..Self::get(target, path)
        }
    }
}

enum Mode {
    Inline(RefCell<Host>),
    Worker(RefCell<WorkerSlot>),
}

enum WorkerSlot {
    Pending { name: String, factory: ServerFactory },
    Running(Worker),
    Stopped,
}

impl WorkerSlot {
    fn start(&mut self) -> std::io::Result<Option<&Worker>> {
        if let WorkerSlot::Pending { .. } = self {
            let WorkerSlot::Pending { name, factory } =
                std::mem::replace(self, WorkerSlot::Stopped)
            else {
                return Ok(None);
            };
            *self = WorkerSlot::Running(Worker::spawn(&name, factory)?);
        }
        match self {
            WorkerSlot::Running(worker) => Ok(Some(worker)),
            _ => Ok(None),
        }
    }
}

/// Resets the busy flag when a request ends, however it ends.
struct BusyGate<'a>(&'a Cell<bool>);

impl Drop for BusyGate<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Runs engine jobs and applies the call-boundary policy.
pub struct Executor {
    mode: Mode,
    busy: Cell<bool>,
    finished: Cell<bool>,
    status: Arc<ProxyStatus>,
    classifier: FailureClassifier,
    log_errors: bool,
    observer: RefCell<Option<ErrorObserver>>,
}

impl Executor {
    pub fn new(factory: ServerFactory, config: ProxyConfig) -> Self {
        let mode = if config.use_worker {
            Mode::Worker(RefCell::new(WorkerSlot::Pending {
                name: config.worker_name,
                factory,
            }))
        } else {
            Mode::Inline(RefCell::new(Host::new(factory)))
        };
        Self {
            mode,
            busy: Cell::new(false),
            finished: Cell::new(false),
            status: Arc::new(ProxyStatus::new()),
            classifier: config.classification,
            log_errors: config.log_errors,
            observer: RefCell::new(None),
        }
    }

    pub fn status(&self) -> &Arc<ProxyStatus> {
        &self.status
    }

    pub fn is_worker(&self) -> bool {
        matches!(self.mode, Mode::Worker(_))
    }

    pub fn set_observer(&self, observer: Option<ErrorObserver>) {
        match self.observer.try_borrow_mut() {
            Ok(mut slot) => *slot = observer,
            Err(_) => tracing::warn!("error observer cannot be replaced from inside itself"),
        }
    }

    /// Start the worker thread, if this executor uses one.
    pub fn start(&self) -> std::io::Result<()> {
        if let Mode::Worker(slot) = &self.mode {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                slot.start()?;
            }
        }
        Ok(())
    }

    /// Run `job` with exclusive access to the host, on whichever thread owns
    /// it, and wait for the result.
    pub fn run<R, F>(&self, job: F) -> Result<R, CallError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Host) -> R + Send + 'static,
    {
        if self.finished.get() {
            return Err(CallError::Finished);
        }
        if self.busy.replace(true) {
            return Err(CallError::Busy);
        }
        let _gate = BusyGate(&self.busy);

        match &self.mode {
            Mode::Inline(host) => {
                let mut host = host.try_borrow_mut().map_err(|_| CallError::Busy)?;
                Ok(job(&mut host))
            }
            Mode::Worker(slot) => {
                let mut slot = slot.try_borrow_mut().map_err(|_| CallError::Busy)?;
                let outcome = match slot.start() {
                    Ok(Some(worker)) => worker.submit(job),
                    Ok(None) => None,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to start automation worker");
                        None
                    }
                };
                match outcome {
                    Some(value) => Ok(value),
                    None => {
                        *slot = WorkerSlot::Stopped;
                        self.status.request_abort();
                        Err(CallError::Fatal {
                            path: String::new(),
                            source: ServerError::new(
                                status::RPC_E_DISCONNECTED,
                                "automation worker is not running",
                            ),
                        })
                    }
                }
            }
        }
    }

    /// Run an engine operation as a call: refused while aborted, and any
    /// failure is classified, logged, and reported.
    pub fn call<R, F>(&self, context: &str, quiet: bool, job: F) -> Result<R, CallError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Host) -> Result<R, EngineError> + Send + 'static,
    {
        if self.status.is_aborted() {
            return Err(CallError::Aborted);
        }
        match self.run(job) {
            Ok(Ok(value)) => {
                self.status.record_success();
                Ok(value)
            }
            Ok(Err(e)) => Err(self.fail(context, e, quiet)),
            Err(CallError::Fatal { source, .. }) => {
                let error = CallError::Fatal {
                    path: context.to_string(),
                    source,
                };
                self.notify(context, &error);
                Err(error)
            }
            Err(e) => Err(e),
        }
    }

    /// Report a failure detected before anything was dispatched.
    pub fn reject(&self, context: &str, error: EngineError) -> CallError {
        if self.status.is_aborted() {
            return CallError::Aborted;
        }
        self.fail(context, error, false)
    }

    fn fail(&self, context: &str, error: EngineError, quiet: bool) -> CallError {
        let path = context.to_string();
        let error = match error {
            EngineError::Server { error, member } => match self.classifier.classify(error.code) {
                FailureClass::Recoverable => CallError::Resolution {
                    path,
                    code: Some(error.code),
                    message: format!("{member}: {}", error.message),
                },
                FailureClass::Transient => CallError::Transient {
                    path,
                    source: error,
                },
                FailureClass::Fatal => CallError::Fatal {
                    path,
                    source: error,
                },
            },
            e @ (EngineError::NotAnObject { .. } | EngineError::Path(_)) => {
                CallError::Resolution {
                    path,
                    code: None,
                    message: e.to_string(),
                }
            }
            EngineError::Marshal(e) => CallError::Marshal(e),
            EngineError::NotConnected => CallError::NotConnected,
        };

        if let Some(class) = error.class() {
            self.status.record_failure(class);
        }
        if !quiet {
            self.notify(context, &error);
        }
        error
    }

    fn notify(&self, context: &str, error: &CallError) {
        if self.log_errors {
            tracing::warn!(path = context, error = %error, "automation call failed");
        }
        if self.status.is_ignoring() {
            return;
        }
        // A nested failure raised from inside the observer is not reported
        // to it again.
        let Ok(mut observer) = self.observer.try_borrow_mut() else {
            return;
        };
        if let Some(observer) = observer.as_mut() {
            let report = ErrorReport {
                code: error.code(),
                message: error.to_string(),
                context: (!context.is_empty()).then(|| context.to_string()),
                class: error.class(),
            };
            let verdict = observer(&report);
            self.status.apply(verdict);
        }
    }

    /// Stop accepting calls. A worker exits after the request in flight.
    pub fn finish(&self) {
        self.finished.set(true);
        if let Mode::Worker(slot) = &self.mode {
            if let Ok(slot) = slot.try_borrow() {
                if let WorkerSlot::Running(worker) = &*slot {
                    worker.finish();
                }
            }
        }
    }

    /// Tear down the engine on its own thread and stop the worker.
    pub fn shutdown(&self) -> TeardownReport {
        self.finished.set(true);
        match &self.mode {
            Mode::Inline(host) => host
                .try_borrow_mut()
                .map(|mut host| host.teardown())
                .unwrap_or_default(),
            Mode::Worker(slot) => {
                let Ok(mut slot) = slot.try_borrow_mut() else {
                    return TeardownReport::default();
                };
                match std::mem::replace(&mut *slot, WorkerSlot::Stopped) {
                    WorkerSlot::Running(worker) => {
                        // After finish() the worker has already torn down on
                        // its way out; its join result carries that report.
                        let report = worker.submit(|host| host.teardown()).unwrap_or_default();
                        let on_exit = worker.join();
                        TeardownReport {
                            released: report.released + on_exit.released,
                            failed: report.failed + on_exit.failed,
                        }
                    }
                    _ => TeardownReport::default(),
                }
            }
        }
    }
}
