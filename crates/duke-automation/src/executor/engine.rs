//! The part of the executor that actually talks to the server.
//!
//! An [`Engine`] owns the server connection, the object cache, and the root
//! handle. It is only ever used from one thread: the worker if there is one,
//! the caller's thread otherwise.

use dispatch_protocol::{status, Handle, WireValue};
use thiserror::Error;

use crate::cache::{ObjectCache, Tier};
use crate::error::{MarshalError, PathError, ServerError};
use crate::marshal::{self, WireArgs};
use crate::path::{MemberPath, Segment};
use crate::server::{AutomationServer, ServerFactory};
use crate::value::MAX_ARGS;

use super::{Request, RequestKind};

/// Why an engine operation failed, before classification.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("{member}: {error}")]
    Server { error: ServerError, member: String },

    #[error("'{member}' returned {found}, not an object")]
    NotAnObject { member: String, found: &'static str },

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Marshal(#[from] MarshalError),

    #[error("not connected to an automation server")]
    NotConnected,
}

/// Outcome of releasing everything at disconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub released: usize,
    pub failed: usize,
}

/// Server connection plus handle bookkeeping.
pub struct Engine {
    server: Box<dyn AutomationServer>,
    cache: ObjectCache,
    root: Option<Handle>,
    torn_down: bool,
}

impl Engine {
    pub fn new(server: Box<dyn AutomationServer>) -> Self {
        Self {
            server,
            cache: ObjectCache::new(),
            root: None,
            torn_down: false,
        }
    }

    pub fn root(&self) -> Option<Handle> {
        self.root
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Instantiate the server object and make it the root. Connecting twice
    /// returns the existing root.
    pub fn connect(&mut self, server_name: &str) -> Result<Handle, ServerError> {
        if let Some(root) = self.root {
            return Ok(root);
        }
        let root = self.server.create(server_name)?;
        if !root.is_valid() {
            return Err(ServerError::new(
                status::E_HANDLE,
                format!("'{server_name}' returned a null object"),
            ));
        }
        self.cache
            .remember(Handle::NONE, server_name, root, Tier::Constant);
        self.root = Some(root);
        tracing::info!(server = server_name, %root, "connected to automation server");
        Ok(root)
    }

    /// `Handle::NONE` stands for the root object.
    fn base(&self, parent: Handle) -> Result<Handle, EngineError> {
        match parent.valid() {
            Some(parent) => Ok(parent),
            None => self.root.ok_or(EngineError::NotConnected),
        }
    }

    /// Resolve intermediate segments to a handle, cache first.
    fn walk(&mut self, parent: Handle, segments: &[Segment]) -> Result<Handle, EngineError> {
        let mut current = self.base(parent)?;
        for segment in segments {
            let key = segment.key();
            if let Some(cached) = self.cache.lookup(current, &key) {
                current = cached;
                continue;
            }
            let args = marshal::to_wire_args(&segment.args)?;
            let value = self
                .server
                .get(current, &segment.name, &args)
                .map_err(|error| EngineError::Server {
                    error,
                    member: key.clone(),
                })?;
            let Some(child) = value.as_dispatch() else {
                return Err(EngineError::NotAnObject {
                    member: key,
                    found: value.type_name(),
                });
            };
            tracing::trace!(parent = %current, member = %key, %child, "resolved");
            self.cache.remember(current, &key, child, Tier::Volatile);
            current = child;
        }
        Ok(current)
    }

    /// Resolve a whole path to an object handle. The result is cached as
    /// volatile like every intermediate.
    pub fn resolve(&mut self, parent: Handle, path: &MemberPath) -> Result<Handle, EngineError> {
        self.walk(parent, path.segments())
    }

    /// Run one get, put, or call.
    pub fn execute(&mut self, request: Request) -> Result<WireValue, EngineError> {
        let Request {
            kind,
            target,
            path,
            args,
            value,
        } = request;
        let (last, intermediate) = path.split_last().ok_or(PathError::Empty)?;

        let count = last.args.len() + args.len();
        if count > MAX_ARGS {
            return Err(MarshalError::TooManyArgs {
                count,
                max: MAX_ARGS,
            }
            .into());
        }
        let target = self.walk(target, intermediate)?;
        let mut wire_args: WireArgs = last.args.iter().map(marshal::to_wire).collect();
        wire_args.extend(args);

        tracing::debug!(?kind, %target, member = %last.name, args = wire_args.len(), "dispatch");
        let result = match kind {
            RequestKind::Get => self.server.get(target, &last.name, &wire_args),
            RequestKind::Put => self
                .server
                .put(target, &last.name, &wire_args, value)
                .map(|()| WireValue::Empty),
            RequestKind::Call => self.server.call(target, &last.name, &wire_args),
        }
        .map_err(|error| EngineError::Server {
            error,
            member: last.key(),
        })?;

        if let Some(handle) = result.as_dispatch() {
            self.cache.adopt(handle);
        }
        Ok(result)
    }

    /// Cache `handle` under `name`; see [`ObjectCache::remember`].
    pub fn assign(
        &mut self,
        name: &str,
        handle: Handle,
        parent: Handle,
        constant: bool,
    ) -> Result<bool, EngineError> {
        let parent = self.base(parent)?;
        let tier = if constant { Tier::Constant } else { Tier::Volatile };
        Ok(self.cache.remember(parent, name, handle, tier))
    }

    pub fn find_cached(&self, name: &str, parent: Handle) -> Option<Handle> {
        let parent = self.base(parent).ok()?;
        self.cache.lookup(parent, name)
    }

    /// Release the object cached as `name` under `parent`, if any.
    pub fn release_object(&mut self, name: &str, parent: Handle) -> Result<bool, EngineError> {
        let parent = self.base(parent)?;
        match self.cache.remove(parent, name) {
            Some(handle) => {
                self.release(handle).map_err(|error| EngineError::Server {
                    error,
                    member: name.to_string(),
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop every cache entry for `handle` and release it on the server.
    pub fn release(&mut self, handle: Handle) -> Result<(), ServerError> {
        if Some(handle) == self.root {
            return Err(ServerError::new(
                status::E_INVALIDARG,
                "the root object is only released by disconnect",
            ));
        }
        self.cache.release(handle);
        self.server.release(handle)
    }

    pub fn forget_volatile(&mut self) -> usize {
        self.cache.forget_volatile()
    }

    /// Release everything on the garbage list. Failures are logged.
    pub fn collect_garbage(&mut self) -> usize {
        let mut released = 0;
        for handle in self.cache.drain_garbage() {
            match self.server.release(handle) {
                Ok(()) => released += 1,
                Err(e) => tracing::warn!(%handle, error = %e, "failed to release object"),
            }
        }
        released
    }

    /// Release every tracked handle, the root last, then shut the server
    /// down. Runs once; release failures are logged and counted.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            return report;
        }
        self.torn_down = true;

        for handle in self.cache.drain_for_teardown(self.root.take()) {
            match self.server.release(handle) {
                Ok(()) => report.released += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(%handle, error = %e, "release failed during teardown");
                }
            }
        }
        self.server.shutdown();
        tracing::info!(
            released = report.released,
            failed = report.failed,
            "disconnected from automation server"
        );
        report
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Owns the server factory until the first connect, then the engine.
pub struct Host {
    factory: Option<ServerFactory>,
    engine: Option<Engine>,
}

impl Host {
    pub fn new(factory: ServerFactory) -> Self {
        Self {
            factory: Some(factory),
            engine: None,
        }
    }

    /// Build the server (on this thread) if needed and connect.
    pub fn connect(&mut self, server_name: &str) -> Result<Handle, ServerError> {
        let engine = match self.engine.take() {
            Some(engine) => engine,
            None => {
                let factory = self.factory.take().ok_or_else(|| {
                    ServerError::new(
                        status::RPC_S_SERVER_UNAVAILABLE,
                        "automation server could not be constructed",
                    )
                })?;
                Engine::new(factory()?)
            }
        };
        self.engine.insert(engine).connect(server_name)
    }

    /// The connected engine.
    pub fn engine(&mut self) -> Result<&mut Engine, EngineError> {
        match self.engine.as_mut() {
            Some(engine) if engine.root().is_some() => Ok(engine),
            _ => Err(EngineError::NotConnected),
        }
    }

    pub fn teardown(&mut self) -> TeardownReport {
        self.factory = None;
        self.engine
            .take()
            .map(|mut engine| engine.teardown())
            .unwrap_or_default()
    }
}
