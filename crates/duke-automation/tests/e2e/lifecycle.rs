//! Connect, finish, and teardown.

use duke_automation::server::memory::CallKind;
use duke_automation::server::factory;
use duke_automation::{
    status, AutomationProxy, CallError, DynamicValue, ErrorVerdict, Handle, ProxyState,
    TeardownReport,
};
use pretty_assertions::assert_eq;

use crate::{connect, count_calls, observe, test_server, MODES};

#[test]
fn test_disconnect_releases_everything_root_last() {
    for mode in MODES {
        let (proxy, server, root) = connect(mode);
        let child = proxy.resolve(Handle::NONE, "Child").unwrap();
        proxy.set_property(child, "Value", DynamicValue::Int(5));
        let item = proxy
            .get_property(Handle::NONE, "Item(2)")
            .unwrap()
            .as_handle()
            .unwrap();
        assert!(proxy.assign("Pinned", item, Handle::NONE, true));
        proxy.property(Handle::NONE, "Item(3).Name");
        assert!(server.live_handles().len() >= 4);

        let report = proxy.disconnect();
        assert_eq!(report.failed, 0, "{mode:?}");
        assert_eq!(report.released, server.released().len());
        assert!(server.live_handles().is_empty(), "{mode:?}");
        assert_eq!(server.released().last(), Some(&root));

        // once only
        assert_eq!(proxy.disconnect(), TeardownReport::default());
        assert_eq!(proxy.root(), None);
        assert!(!proxy.is_connected());
    }
}

#[test]
fn test_calls_after_disconnect_are_refused() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        proxy.disconnect();
        server.clear_calls();
        assert!(matches!(
            proxy.try_invoke(Handle::NONE, "Echo", &[]),
            Err(CallError::Finished)
        ));
        assert_eq!(proxy.resolve(Handle::NONE, "Child"), None);
        assert!(server.calls().is_empty());
        assert_eq!(proxy.state(), ProxyState::Normal);
    }
}

#[test]
fn test_drop_disconnects() {
    for mode in MODES {
        let server = test_server();
        {
            let remote = server.clone();
            let proxy =
                AutomationProxy::launch("TestServer", factory(move || Ok(remote)), mode.config())
                    .unwrap();
            proxy.resolve(Handle::NONE, "Child").unwrap();
            proxy.invoke(Handle::NONE, "Item(1).Name", &[]);
        }
        assert!(server.live_handles().is_empty(), "{mode:?}");
        assert_eq!(count_calls(&server, CallKind::Create), 1);
    }
}

#[test]
fn test_finish_stops_accepting_calls() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        proxy.resolve(Handle::NONE, "Child").unwrap();
        proxy.finish();
        assert!(matches!(
            proxy.get_property(Handle::NONE, "Name"),
            Err(CallError::Finished)
        ));
        let report = proxy.disconnect();
        assert!(server.live_handles().is_empty(), "{mode:?}");
        // root plus Child, released by whichever thread tore down
        assert_eq!(report.released, server.released().len(), "{mode:?}");
        assert_eq!(report.released, 2);
        assert_eq!(report.failed, 0);
    }
}

#[test]
fn test_connect_twice_returns_the_same_root() {
    for mode in MODES {
        let (proxy, server, root) = connect(mode);
        assert_eq!(proxy.connect("TestServer").unwrap(), root);
        assert_eq!(proxy.root(), Some(root));
        assert!(proxy.is_connected());
        assert_eq!(count_calls(&server, CallKind::Create), 1);
        // starting again is harmless
        proxy.start().unwrap();
        assert!(proxy.invoke(Handle::NONE, "Echo", &[]).0);
    }
}

#[test]
fn test_root_is_only_released_by_disconnect() {
    for mode in MODES {
        let (proxy, server, root) = connect(mode);
        let reports = observe(&proxy, ErrorVerdict::Accept);
        assert!(!proxy.release_handle(root));
        assert_eq!(reports.borrow()[0].code, Some(status::E_INVALIDARG));
        assert_eq!(proxy.state(), ProxyState::Normal);
        assert!(server.released().is_empty());
        assert!(proxy.invoke(root, "Echo", &[]).0);
    }
}
