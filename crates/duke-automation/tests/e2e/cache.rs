//! Object cache behavior seen through the proxy.

use duke_automation::server::memory::CallKind;
use duke_automation::{DynamicValue, ErrorVerdict, Handle, ProxyState};
use pretty_assertions::assert_eq;

use crate::{connect, count_calls, observe, MODES};

#[test]
fn test_resolution_is_cached_case_insensitively() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let child = proxy.resolve(Handle::NONE, "Child").unwrap();
        let gets = count_calls(&server, CallKind::Get);

        assert_eq!(proxy.resolve(Handle::NONE, "CHILD"), Some(child));
        assert_eq!(proxy.find_cached("child", Handle::NONE), Some(child));
        assert_eq!(count_calls(&server, CallKind::Get), gets, "{mode:?}");
    }
}

#[test]
fn test_clear_bag_defers_release() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let child = proxy.resolve(Handle::NONE, "Child").unwrap();
        let item = proxy.resolve(Handle::NONE, "Item(7)").unwrap();
        assert!(server.released().is_empty());

        assert_eq!(proxy.clear_bag(), 2, "{mode:?}");
        let released = server.released();
        assert!(released.contains(&child));
        assert!(released.contains(&item));
        assert_eq!(proxy.find_cached("Child", Handle::NONE), None);

        // the next resolution asks the server again
        let again = proxy.resolve(Handle::NONE, "Child").unwrap();
        assert_ne!(again, child);
        assert_eq!(proxy.clear_bag(), 1);
        assert_eq!(proxy.clear_bag(), 0);
    }
}

#[test]
fn test_constant_entries_survive_context_changes() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let child = proxy.resolve(Handle::NONE, "Child").unwrap();
        let other = proxy.resolve(Handle::NONE, "Item(1)").unwrap();

        assert!(proxy.assign("Main", child, Handle::NONE, true));
        // constants are never overwritten
        assert!(!proxy.assign("Main", other, Handle::NONE, true));
        assert!(!proxy.assign("main", other, Handle::NONE, false));
        assert_eq!(proxy.find_cached("MAIN", Handle::NONE), Some(child));

        assert_eq!(proxy.clear_bag(), 1);
        assert!(!server.released().contains(&child), "{mode:?}");
        assert!(server.released().contains(&other));
        assert_eq!(proxy.resolve(Handle::NONE, "Main"), Some(child));

        // values read through the pinned object still work
        assert!(proxy.set_property(Handle::NONE, "Main.Value", DynamicValue::Int(9)));
        assert_eq!(proxy.property(child, "Value"), Some(DynamicValue::Int(9)));
    }
}

#[test]
fn test_object_exists_is_quiet() {
    for mode in MODES {
        let (proxy, _server, _root) = connect(mode);
        let reports = observe(&proxy, ErrorVerdict::Accept);

        assert!(proxy.object_exists("Child", Handle::NONE));
        assert!(proxy.object_exists(r#"Item("x")"#, Handle::NONE));
        assert!(!proxy.object_exists("Nope", Handle::NONE));
        assert!(!proxy.object_exists("Child.Nope", Handle::NONE));
        // a value, not an object
        assert!(!proxy.object_exists("Name", Handle::NONE));

        assert!(reports.borrow().is_empty(), "{mode:?}");
        assert_eq!(proxy.state(), ProxyState::Normal);
    }
}

#[test]
fn test_release_object_and_handle() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let child = proxy.resolve(Handle::NONE, "Child").unwrap();
        assert!(proxy.release_object("child", Handle::NONE));
        assert_eq!(server.released(), vec![child]);
        assert_eq!(proxy.find_cached("Child", Handle::NONE), None);
        assert!(!proxy.release_object("Child", Handle::NONE));

        // handles returned as values are owned until released
        let item = proxy
            .get_property(Handle::NONE, "Item(1)")
            .unwrap()
            .as_handle()
            .unwrap();
        assert!(proxy.owned_handles().contains(&item));
        assert_eq!(proxy.clear_bag(), 0);
        assert!(proxy.release_handle(item));
        assert!(!proxy.owned_handles().contains(&item));
        assert!(server.released().contains(&item), "{mode:?}");
    }
}
