//! Shared wire types for late-bound automation.
//!
//! These types describe values exactly the way the automation ABI carries
//! them (a tagged variant plus multi-dimensional arrays), independent of the
//! platform that actually hosts the server objects. They are used both by
//! the in-process proxy and by the `dispatch-bridge` helper process, which
//! speaks JSON-over-stdio: one JSON object per line in each direction.

pub mod message;
pub mod status;
pub mod value;

pub use message::{Command, Request, Response, ResponseData, ResponseResult};
pub use status::StatusCode;
pub use value::{Dimension, SafeArray, WireValue};

use serde::{Deserialize, Serialize};

/// Opaque reference to a live object inside the automation server.
///
/// Handles are only meaningful to the server that issued them and are not
/// stable across server restarts. `Handle::NONE` (zero) means "no object".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u64);

impl Handle {
    /// The invalid handle.
    pub const NONE: Handle = Handle(0);

    pub fn new(raw: u64) -> Self {
        Handle(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// `Some(self)` for a valid handle, `None` for `Handle::NONE`.
    pub fn valid(self) -> Option<Handle> {
        self.is_valid().then_some(self)
    }
}

impl From<u64> for Handle {
    fn from(raw: u64) -> Self {
        Handle(raw)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
