//! Shared helpers for the e2e tests.

use std::cell::RefCell;
use std::rc::Rc;

use duke_automation::server::memory::{CallEvent, CallKind, Phase};
use duke_automation::server::{factory, MemoryServer, ObjectTemplate};
use duke_automation::{AutomationProxy, ErrorReport, ErrorVerdict, Handle, ProxyConfig, WireValue};

/// Where the proxy runs its calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Inline,
    Worker,
}

pub const MODES: [Mode; 2] = [Mode::Inline, Mode::Worker];

pub const WORKER_NAME: &str = "automation-worker";

impl Mode {
    pub fn config(self) -> ProxyConfig {
        match self {
            Mode::Inline => ProxyConfig::inline(),
            Mode::Worker => ProxyConfig::default(),
        }
    }
}

/// The spreadsheet model plus a small `TestServer` class.
pub fn test_server() -> MemoryServer {
    let child = ObjectTemplate::new()
        .value("Name", WireValue::Bstr("child".into()))
        .value("Value", WireValue::Empty);
    let root = ObjectTemplate::new()
        .value("Name", WireValue::Bstr("TestServer".into()))
        .child("Child", child.clone())
        .indexed("Item", child)
        .method("Echo", |_, args| {
            Ok(args.first().cloned().unwrap_or(WireValue::Empty))
        })
        .method("Sum", |_, args| {
            let total = args
                .iter()
                .map(|a| match a {
                    WireValue::I4(n) => *n,
                    _ => 0,
                })
                .sum();
            Ok(WireValue::I4(total))
        })
        .method("ArgCount", |_, args| Ok(WireValue::I4(args.len() as i32)));
    MemoryServer::spreadsheet().with_class("TestServer", root)
}

/// Start a proxy against `server_name` and return it with a clone of the
/// server for inspection.
pub fn connect_to(mode: Mode, server_name: &str) -> (AutomationProxy, MemoryServer, Handle) {
    let server = test_server();
    let remote = server.clone();
    let proxy = AutomationProxy::new(factory(move || Ok(remote)), mode.config());
    proxy.start().unwrap();
    let root = proxy.connect(server_name).unwrap();
    (proxy, server, root)
}

pub fn connect(mode: Mode) -> (AutomationProxy, MemoryServer, Handle) {
    connect_to(mode, "TestServer")
}

/// Register an observer that records every report and answers `verdict`.
pub fn observe(proxy: &AutomationProxy, verdict: ErrorVerdict) -> Rc<RefCell<Vec<ErrorReport>>> {
    let reports = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reports);
    proxy.set_error_observer(move |report| {
        sink.borrow_mut().push(report.clone());
        verdict
    });
    reports
}

pub fn count_calls(server: &MemoryServer, kind: CallKind) -> usize {
    server
        .calls()
        .iter()
        .filter(|e| e.kind == kind && e.phase == Phase::Begin)
        .count()
}

/// Every `Begin` is immediately followed by its `End`.
pub fn assert_not_interleaved(events: &[CallEvent]) {
    assert!(events.len() % 2 == 0, "unbalanced call log: {events:?}");
    for pair in events.chunks(2) {
        assert_eq!(pair[0].phase, Phase::Begin, "{pair:?}");
        assert_eq!(pair[1].phase, Phase::End, "{pair:?}");
        assert_eq!(pair[0].kind, pair[1].kind, "{pair:?}");
        assert_eq!(pair[0].thread, pair[1].thread, "{pair:?}");
    }
}
