//! Automation server backends.
//!
//! An [`AutomationServer`] is the late-bound object host the proxy drives:
//! it instantiates a root object by name and answers get/put/call requests
//! against handles it issued. Implementations are not required to be
//! thread-safe; the proxy only ever touches a server from the thread that
//! created it.

pub mod bridge;
pub mod memory;

use dispatch_protocol::{Handle, WireValue};

use crate::error::ServerError;

pub use bridge::{BridgeConfig, BridgeError, BridgeServer};
pub use memory::{MemoryServer, MethodContext, ObjectTemplate};

/// A late-bound automation object host.
///
/// Every object-valued result is returned as a fresh handle owned by the
/// caller, who must eventually pass it to [`release`](Self::release).
pub trait AutomationServer {
    /// Instantiate (or attach to) the server object registered as `name`.
    fn create(&mut self, name: &str) -> Result<Handle, ServerError>;

    /// Read a property, optionally indexed by `args`.
    fn get(&mut self, target: Handle, member: &str, args: &[WireValue])
        -> Result<WireValue, ServerError>;

    /// Write a property, optionally indexed by `args`.
    fn put(
        &mut self,
        target: Handle,
        member: &str,
        args: &[WireValue],
        value: WireValue,
    ) -> Result<(), ServerError>;

    /// Invoke a method with positional arguments.
    fn call(&mut self, target: Handle, member: &str, args: &[WireValue])
        -> Result<WireValue, ServerError>;

    /// Drop a reference previously handed out by this server.
    fn release(&mut self, handle: Handle) -> Result<(), ServerError>;

    /// Called once after every handle has been released.
    fn shutdown(&mut self) {}
}

impl<S: AutomationServer + ?Sized> AutomationServer for Box<S> {
    fn create(&mut self, name: &str) -> Result<Handle, ServerError> {
        (**self).create(name)
    }

    fn get(
        &mut self,
        target: Handle,
        member: &str,
        args: &[WireValue],
    ) -> Result<WireValue, ServerError> {
        (**self).get(target, member, args)
    }

    fn put(
        &mut self,
        target: Handle,
        member: &str,
        args: &[WireValue],
        value: WireValue,
    ) -> Result<(), ServerError> {
        (**self).put(target, member, args, value)
    }

    fn call(
        &mut self,
        target: Handle,
        member: &str,
        args: &[WireValue],
    ) -> Result<WireValue, ServerError> {
        (**self).call(target, member, args)
    }

    fn release(&mut self, handle: Handle) -> Result<(), ServerError> {
        (**self).release(handle)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

/// Builds the server on the thread that will use it.
pub type ServerFactory =
    Box<dyn FnOnce() -> Result<Box<dyn AutomationServer>, ServerError> + Send>;

/// Wrap a server constructor as a [`ServerFactory`].
pub fn factory<S, F>(build: F) -> ServerFactory
where
    S: AutomationServer + 'static,
    F: FnOnce() -> Result<S, ServerError> + Send + 'static,
{
    Box::new(move || build().map(|server| Box::new(server) as Box<dyn AutomationServer>))
}
