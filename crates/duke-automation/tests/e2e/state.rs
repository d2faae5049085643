//! Session state transitions and error notification.

use std::thread;

use duke_automation::server::memory::CallKind;
use duke_automation::server::{factory, MemoryServer};
use duke_automation::{
    status, AutomationProxy, CallError, DynamicValue, ErrorVerdict, FailureClass, Handle,
    ProxyConfig, ProxyState, StatusCode,
};
use pretty_assertions::assert_eq;

use crate::{connect, count_calls, observe, test_server, MODES};

fn echo(proxy: &AutomationProxy) -> bool {
    proxy.invoke(Handle::NONE, "Echo", &[DynamicValue::Int(1)]).0
}

#[test]
fn test_transient_failure_is_reported_once() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let reports = observe(&proxy, ErrorVerdict::Accept);

        server.fail_times("Echo", status::RPC_E_CALL_REJECTED, 1);
        assert!(!echo(&proxy));
        assert_eq!(proxy.state(), ProxyState::Retry, "{mode:?}");
        assert_eq!(reports.borrow().len(), 1);
        assert_eq!(reports.borrow()[0].class, Some(FailureClass::Transient));
        assert_eq!(reports.borrow()[0].code, Some(status::RPC_E_CALL_REJECTED));

        // clear_abort does not touch Retry
        assert!(!proxy.clear_abort());
        assert_eq!(proxy.state(), ProxyState::Retry);

        // re-issuing the identical call goes through
        assert!(echo(&proxy));
        assert_eq!(proxy.state(), ProxyState::Normal);
        assert_eq!(reports.borrow().len(), 1);
    }
}

#[test]
fn test_ignore_suppresses_notification() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let reports = observe(&proxy, ErrorVerdict::Accept);
        proxy.set_ignore(true);
        assert_eq!(proxy.state(), ProxyState::Ignore);

        server.fail_times("Echo", status::RPC_E_CALL_REJECTED, 1);
        assert!(!echo(&proxy));
        assert!(reports.borrow().is_empty(), "{mode:?}");
        assert_eq!(proxy.state(), ProxyState::Retry);

        assert!(echo(&proxy));
        assert_eq!(proxy.state(), ProxyState::Ignore);

        proxy.set_ignore(false);
        assert_eq!(proxy.state(), ProxyState::Normal);
        server.fail_times("Echo", status::RPC_E_CALL_REJECTED, 1);
        assert!(!echo(&proxy));
        assert_eq!(reports.borrow().len(), 1);
    }
}

#[test]
fn test_fatal_failure_aborts_the_session() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let reports = observe(&proxy, ErrorVerdict::Accept);

        server.fail("Echo", status::RPC_E_DISCONNECTED);
        assert!(!echo(&proxy));
        assert_eq!(proxy.state(), ProxyState::Abort, "{mode:?}");
        assert_eq!(reports.borrow()[0].class, Some(FailureClass::Fatal));

        // aborted calls fail fast: no server traffic, no notification
        server.clear_calls();
        assert!(!echo(&proxy));
        assert!(matches!(
            proxy.try_invoke(Handle::NONE, "Echo", &[]),
            Err(CallError::Aborted)
        ));
        assert_eq!(proxy.property(Handle::NONE, "Name"), None);
        assert!(server.calls().is_empty());
        assert_eq!(reports.borrow().len(), 1);

        assert!(proxy.clear_abort());
        assert_eq!(proxy.state(), ProxyState::Normal);
        assert!(!proxy.clear_abort());
        server.clear_faults();
        assert!(echo(&proxy));
    }
}

#[test]
fn test_abort_requested_from_another_thread() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let status = proxy.status();
        thread::spawn(move || status.request_abort()).join().unwrap();

        assert_eq!(proxy.state(), ProxyState::Abort);
        server.clear_calls();
        assert!(matches!(
            proxy.get_property(Handle::NONE, "Name"),
            Err(CallError::Aborted)
        ));
        assert_eq!(count_calls(&server, CallKind::Get), 0);
    }
}

#[test]
fn test_observer_verdict_escalates() {
    for mode in MODES {
        let (proxy, _server, _root) = connect(mode);
        let reports = observe(&proxy, ErrorVerdict::Abort);
        assert!(proxy.resolve(Handle::NONE, "Nope").is_none());
        assert_eq!(proxy.state(), ProxyState::Abort);
        assert_eq!(reports.borrow().len(), 1);
        proxy.clear_abort();

        let reports = observe(&proxy, ErrorVerdict::Ignore);
        assert!(proxy.resolve(Handle::NONE, "Nope").is_none());
        assert!(proxy.resolve(Handle::NONE, "Nope").is_none());
        assert_eq!(reports.borrow().len(), 1);
        assert_eq!(proxy.state(), ProxyState::Ignore);

        proxy.set_ignore(false);
        let reports = observe(&proxy, ErrorVerdict::Retry);
        assert!(proxy.resolve(Handle::NONE, "Nope").is_none());
        assert_eq!(reports.borrow().len(), 1);
        assert_eq!(proxy.state(), ProxyState::Retry);
    }
}

#[test]
fn test_retry_verdict_does_not_lift_an_abort() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let reports = observe(&proxy, ErrorVerdict::Retry);

        server.fail_times("Echo", status::RPC_E_DISCONNECTED, 1);
        assert!(!echo(&proxy));
        assert_eq!(reports.borrow().len(), 1);
        assert_eq!(proxy.state(), ProxyState::Abort, "{mode:?}");

        // still aborted: the next call fails fast instead of resetting state
        assert!(!echo(&proxy));
        assert_eq!(proxy.state(), ProxyState::Abort);

        assert!(proxy.clear_abort());
        assert!(echo(&proxy));
        assert_eq!(proxy.state(), ProxyState::Normal);
    }
}

#[test]
fn test_configured_classification() {
    let config = ProxyConfig::from_json_str(
        r#"{"use_worker": false, "classification": {"transient": ["0x80004005"]}}"#,
    )
    .unwrap();
    let server = test_server();
    let remote = server.clone();
    let proxy = AutomationProxy::launch("TestServer", factory(move || Ok(remote)), config).unwrap();

    server.fail_times("Echo", status::E_FAIL, 1);
    assert!(!echo(&proxy));
    assert_eq!(proxy.state(), ProxyState::Retry);

    // unlisted codes are fatal
    server.fail_times("Echo", StatusCode::from_u32(0x8004_0200), 1);
    assert!(!echo(&proxy));
    assert_eq!(proxy.state(), ProxyState::Abort);
}

#[test]
fn test_failed_connect() {
    for mode in MODES {
        let server = MemoryServer::new();
        let proxy = AutomationProxy::new(factory(move || Ok(server)), mode.config());
        let err = proxy.connect("Nope.Application").unwrap_err();
        match err {
            duke_automation::ProxyError::Connection { server, source } => {
                assert_eq!(server, "Nope.Application");
                assert_eq!(source.code, status::CO_E_CLASSSTRING);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(proxy.root(), None);
        assert!(matches!(
            proxy.try_invoke(Handle::NONE, "Echo", &[]),
            Err(CallError::NotConnected)
        ));
    }
}
