//! # duke-automation
//!
//! Late-bound automation from Rust: drive an out-of-process automation
//! server (a spreadsheet application, typically) by member path, the way a
//! script would write `ActiveSheet.Range("A1").Value = 42`.
//!
//! ## Features
//!
//! - Dotted member paths with literal arguments, resolved segment by segment
//! - Object cache with volatile and constant entries, and deferred release
//! - Every call on a single worker thread that owns the server connection,
//!   or inline on the caller's thread
//! - Failure classification into per-call errors and a session state
//!   (`Normal`/`Ignore`/`Abort`/`Retry`) with an error observer
//! - Value marshaling, including 2-D blocks for range values
//! - Backends: the `dispatch-bridge` helper process (real `IDispatch`
//!   objects, directly on Windows or under WINE) and an in-memory server
//!
//! ## Architecture
//!
//! ```text
//! AutomationProxy (caller's thread)
//!     └── Executor: busy gate, classification, state, observer
//!           └── worker thread (or inline)
//!                 └── Engine: path walk, object cache, teardown
//!                       └── AutomationServer: BridgeServer | MemoryServer
//! ```
//!
//! ## Example
//!
//! ```rust
//! use duke_automation::server::{self, MemoryServer};
//! use duke_automation::{AutomationProxy, DynamicValue, Handle, ProxyConfig, ProxyState};
//!
//! let proxy = AutomationProxy::launch(
//!     "Excel.Application",
//!     server::factory(|| Ok(MemoryServer::spreadsheet())),
//!     ProxyConfig::default(),
//! )?;
//!
//! let sheet = proxy.resolve(Handle::NONE, "ActiveSheet").unwrap();
//! proxy.set_property(sheet, r#"Range("B2").Value"#, "hello".into());
//! let (ok, _) = proxy.invoke(Handle::NONE, "Calculate", &[]);
//! assert!(ok);
//!
//! // Unknown members fail the call, not the session.
//! let (ok, value) = proxy.invoke(Handle::NONE, "Missing.Method", &[]);
//! assert!(!ok);
//! assert_eq!(value, DynamicValue::Empty);
//! assert_eq!(proxy.state(), ProxyState::Normal);
//!
//! let report = proxy.disconnect();
//! assert_eq!(report.failed, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod marshal;
pub mod path;
pub mod proxy;
pub mod server;
pub mod state;
pub mod value;

pub use config::{FailureClass, FailureClassifier, ProxyConfig};
pub use error::{CallError, MarshalError, PathError, ProxyError, Result, ServerError};
pub use executor::TeardownReport;
pub use marshal::Grid;
pub use path::{MemberPath, Segment};
pub use proxy::AutomationProxy;
pub use state::{ErrorReport, ErrorVerdict, ProxyState, ProxyStatus};
pub use value::{Args, DynamicValue, MAX_ARGS};

pub use dispatch_protocol::{status, Handle, StatusCode, WireValue};
