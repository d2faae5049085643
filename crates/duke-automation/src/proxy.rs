//! The public automation proxy.

use std::cell::Cell;
use std::sync::Arc;

use dispatch_protocol::{Handle, WireValue};

use crate::config::ProxyConfig;
use crate::error::{CallError, ProxyError, Result};
use crate::executor::{EngineError, Executor, Request, TeardownReport};
use crate::marshal::{self, Grid};
use crate::path::MemberPath;
use crate::server::ServerFactory;
use crate::state::{ErrorReport, ErrorVerdict, ProxyState, ProxyStatus};
use crate::value::DynamicValue;

/// A connection to one automation server, driven by member path.
///
/// Every call blocks until it completes, whether it runs on the caller's
/// thread or on the proxy's worker. Only one request is in flight at a
/// time. `Handle::NONE` as a parent means the root object.
///
/// The primitives (`resolve`, `get_property`, `set_property`, `invoke`)
/// never panic and never return errors to the collaborator: failures show up
/// as `None`/`false`, in [`state`](Self::state), and through the error
/// observer. The `try_*` forms return the typed [`CallError`].
///
/// Dropping the proxy disconnects it.
///
/// ```rust
/// use duke_automation::{server, AutomationProxy, DynamicValue, Handle, ProxyConfig};
/// use duke_automation::server::MemoryServer;
///
/// let factory = server::factory(|| Ok(MemoryServer::spreadsheet()));
/// let proxy = AutomationProxy::launch("Excel.Application", factory, ProxyConfig::default())?;
/// assert!(proxy.set_property(Handle::NONE, r#"ActiveSheet.Range("A1").Value"#, 42.into()));
/// let value = proxy.get_property(Handle::NONE, r#"ActiveSheet.Range("A1").Value"#)?;
/// assert_eq!(value, DynamicValue::Int(42));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct AutomationProxy {
    executor: Executor,
    root: Cell<Option<Handle>>,
    disconnected: Cell<bool>,
}

impl AutomationProxy {
    /// Create a proxy. Nothing is started until [`start`](Self::start) or
    /// [`connect`](Self::connect).
    pub fn new(factory: ServerFactory, config: ProxyConfig) -> Self {
        Self {
            executor: Executor::new(factory, config),
            root: Cell::new(None),
            disconnected: Cell::new(false),
        }
    }

    /// Create, start, and connect in one step.
    pub fn launch(server_name: &str, factory: ServerFactory, config: ProxyConfig) -> Result<Self> {
        let proxy = Self::new(factory, config);
        proxy.start()?;
        proxy.connect(server_name)?;
        Ok(proxy)
    }

    /// Start the worker thread, if the proxy uses one.
    pub fn start(&self) -> Result<()> {
        Ok(self.executor.start()?)
    }

    /// Instantiate or attach to the server object `server_name` and return
    /// the root handle.
    pub fn connect(&self, server_name: &str) -> Result<Handle> {
        if let Some(root) = self.root.get() {
            return Ok(root);
        }
        let name = server_name.to_string();
        match self.executor.run(move |host| host.connect(&name))? {
            Ok(root) => {
                self.root.set(Some(root));
                Ok(root)
            }
            Err(source) => {
                tracing::error!(server = server_name, error = %source, "connection failed");
                Err(ProxyError::Connection {
                    server: server_name.to_string(),
                    source,
                })
            }
        }
    }

    /// The root handle, once connected.
    pub fn root(&self) -> Option<Handle> {
        self.root.get()
    }

    pub fn is_connected(&self) -> bool {
        self.root.get().is_some() && !self.disconnected.get()
    }

    // -- primitives --

    /// Resolve `path` under `parent` to an object handle.
    pub fn resolve(&self, parent: Handle, path: &str) -> Option<Handle> {
        self.try_resolve(parent, path).ok()
    }

    pub fn try_resolve(&self, parent: Handle, path: &str) -> std::result::Result<Handle, CallError> {
        let text = path.to_string();
        self.executor.call(path, false, move |host| {
            let path = MemberPath::parse(&text)?;
            host.engine()?.resolve(parent, &path)
        })
    }

    /// Read a property.
    pub fn get_property(
        &self,
        parent: Handle,
        path: &str,
    ) -> std::result::Result<DynamicValue, CallError> {
        let wire = self.get_property_wire(parent, path)?;
        Ok(marshal::from_wire(&wire))
    }

    /// [`get_property`](Self::get_property), with failures as `None`.
    pub fn property(&self, parent: Handle, path: &str) -> Option<DynamicValue> {
        self.get_property(parent, path).ok()
    }

    /// Read a property without converting it.
    pub fn get_property_wire(
        &self,
        parent: Handle,
        path: &str,
    ) -> std::result::Result<WireValue, CallError> {
        let text = path.to_string();
        self.executor.call(path, false, move |host| {
            let path = MemberPath::parse(&text)?;
            host.engine()?.execute(Request::get(parent, path))
        })
    }

    /// Read a 2-D block (a multi-cell range value) as a [`Grid`]. Anything
    /// else, such as the scalar value of a single cell, reads as a 1x1 grid.
    pub fn get_property_grid(
        &self,
        parent: Handle,
        path: &str,
    ) -> std::result::Result<Grid, CallError> {
        let wire = self.get_property_wire(parent, path)?;
        Ok(marshal::grid_from_wire(&wire).unwrap_or_else(|| Grid {
            width: 1,
            height: 1,
            cells: vec![marshal::from_wire(&wire)],
        }))
    }

    /// Write a property. Returns whether the write went through.
    pub fn set_property(&self, parent: Handle, path: &str, value: DynamicValue) -> bool {
        self.try_set_property(parent, path, value).is_ok()
    }

    pub fn try_set_property(
        &self,
        parent: Handle,
        path: &str,
        value: DynamicValue,
    ) -> std::result::Result<(), CallError> {
        self.try_set_property_wire(parent, path, marshal::to_wire(&value))
    }

    /// Write a pre-built wire value, e.g. a 2-D array for a range.
    pub fn set_property_wire(&self, parent: Handle, path: &str, value: WireValue) -> bool {
        self.try_set_property_wire(parent, path, value).is_ok()
    }

    pub fn try_set_property_wire(
        &self,
        parent: Handle,
        path: &str,
        value: WireValue,
    ) -> std::result::Result<(), CallError> {
        let text = path.to_string();
        self.executor.call(path, false, move |host| {
            let path = MemberPath::parse(&text)?;
            host.engine()?.execute(Request::put(parent, path, value))?;
            Ok(())
        })
    }

    /// Write `items` (row-major, exactly `width * height` of them) as a 2-D
    /// block.
    pub fn set_property_grid(
        &self,
        parent: Handle,
        path: &str,
        items: &[DynamicValue],
        width: usize,
        height: usize,
    ) -> bool {
        self.try_set_property_grid(parent, path, items, width, height)
            .is_ok()
    }

    pub fn try_set_property_grid(
        &self,
        parent: Handle,
        path: &str,
        items: &[DynamicValue],
        width: usize,
        height: usize,
    ) -> std::result::Result<(), CallError> {
        let value = marshal::to_wire_grid(items, width, height)
            .map_err(|e| self.executor.reject(path, EngineError::Marshal(e)))?;
        self.try_set_property_wire(parent, path, value)
    }

    /// Invoke a method with up to eight positional arguments.
    pub fn invoke(&self, parent: Handle, path: &str, args: &[DynamicValue]) -> (bool, DynamicValue) {
        match self.try_invoke(parent, path, args) {
            Ok(value) => (true, value),
            Err(_) => (false, DynamicValue::Empty),
        }
    }

    pub fn try_invoke(
        &self,
        parent: Handle,
        path: &str,
        args: &[DynamicValue],
    ) -> std::result::Result<DynamicValue, CallError> {
        let args = marshal::to_wire_args(args)
            .map_err(|e| self.executor.reject(path, EngineError::Marshal(e)))?;
        let text = path.to_string();
        let wire = self.executor.call(path, false, move |host| {
            let path = MemberPath::parse(&text)?;
            host.engine()?.execute(Request::call(parent, path, args))
        })?;
        Ok(marshal::from_wire(&wire))
    }

    // -- object cache --

    /// Cache `handle` as `name` under `parent`. A constant entry is never
    /// replaced; returns false if one already holds the name.
    pub fn assign(&self, name: &str, handle: Handle, parent: Handle, constant: bool) -> bool {
        let name = name.to_string();
        self.executor
            .run(move |host| host.engine()?.assign(&name, handle, parent, constant))
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or(false)
    }

    /// Release the object cached as `name` under `parent`.
    pub fn release_object(&self, name: &str, parent: Handle) -> bool {
        let text = name.to_string();
        self.executor
            .call(name, false, move |host| {
                host.engine()?.release_object(&text, parent)
            })
            .unwrap_or(false)
    }

    /// Release a handle obtained from this proxy and forget it everywhere.
    pub fn release_handle(&self, handle: Handle) -> bool {
        let context = handle.to_string();
        self.executor
            .call(&context, false, move |host| {
                host.engine()?
                    .release(handle)
                    .map_err(|error| EngineError::Server {
                        error,
                        member: handle.to_string(),
                    })
            })
            .is_ok()
    }

    /// Forget every volatile cache entry and release all deferred handles.
    /// Call this whenever the server's context changed (another sheet was
    /// activated, a workbook closed). Returns the number released.
    pub fn clear_bag(&self) -> usize {
        self.executor
            .run(|host| {
                let engine = host.engine()?;
                engine.forget_volatile();
                Ok::<_, EngineError>(engine.collect_garbage())
            })
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or(0)
    }

    /// The cached handle for `name` under `parent`, without asking the server.
    pub fn find_cached(&self, name: &str, parent: Handle) -> Option<Handle> {
        let name = name.to_string();
        self.executor
            .run(move |host| host.engine().ok()?.find_cached(&name, parent))
            .ok()
            .flatten()
    }

    /// Whether `path` under `parent` resolves to an object. Failures are not
    /// reported to the error observer.
    pub fn object_exists(&self, path: &str, parent: Handle) -> bool {
        if self.find_cached(path, parent).is_some() {
            return true;
        }
        let text = path.to_string();
        self.executor
            .call(path, true, move |host| {
                let path = MemberPath::parse(&text)?;
                host.engine()?.resolve(parent, &path)
            })
            .is_ok()
    }

    /// Every handle the proxy currently owns, sorted.
    pub fn owned_handles(&self) -> Vec<Handle> {
        self.executor
            .run(|host| {
                host.engine()
                    .map(|engine| engine.cache().owned_handles())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    // -- lifecycle --

    pub fn state(&self) -> ProxyState {
        self.executor.status().state()
    }

    /// Shared state handle, for a watchdog that wants to abort from another
    /// thread.
    pub fn status(&self) -> Arc<ProxyStatus> {
        Arc::clone(self.executor.status())
    }

    /// `Abort -> Normal`. Does not retry anything.
    pub fn clear_abort(&self) -> bool {
        self.executor.status().clear_abort()
    }

    /// Suppress (or resume) error notifications.
    pub fn set_ignore(&self, on: bool) {
        self.executor.status().set_ignore(on);
    }

    /// Register the callback told about every failed call.
    pub fn set_error_observer<F>(&self, observer: F)
    where
        F: FnMut(&ErrorReport) -> ErrorVerdict + 'static,
    {
        self.executor.set_observer(Some(Box::new(observer)));
    }

    pub fn clear_error_observer(&self) {
        self.executor.set_observer(None);
    }

    /// Stop accepting calls; the worker exits after the current request.
    pub fn finish(&self) {
        self.executor.finish();
    }

    /// Release every tracked handle (non-constant first, the root last) and
    /// stop the worker. Runs once; later calls return an empty report.
    pub fn disconnect(&self) -> TeardownReport {
        if self.disconnected.replace(true) {
            return TeardownReport::default();
        }
        let report = self.executor.shutdown();
        self.root.set(None);
        report
    }
}

impl Drop for AutomationProxy {
    fn drop(&mut self) {
        self.disconnect();
    }
}
