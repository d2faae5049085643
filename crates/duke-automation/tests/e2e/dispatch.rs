//! Property and method dispatch through member paths.

use std::thread;

use chrono::NaiveDate;
use duke_automation::server::memory::CallKind;
use duke_automation::{
    status, CallError, DynamicValue, ErrorVerdict, FailureClass, Handle, ProxyState,
};
use pretty_assertions::assert_eq;

use crate::{assert_not_interleaved, connect, connect_to, count_calls, observe, MODES, WORKER_NAME};

#[test]
fn test_child_value_roundtrip() {
    for mode in MODES {
        let (proxy, _server, root) = connect(mode);
        assert!(root.is_valid());

        let child = proxy.resolve(root, "Child").expect("Child resolves");
        assert!(child.is_valid());
        assert!(proxy.set_property(child, "Value", DynamicValue::from_string("abc")));
        assert_eq!(
            proxy.get_property(child, "Value").unwrap(),
            DynamicValue::from_string("abc"),
            "{mode:?}"
        );
        assert_eq!(proxy.state(), ProxyState::Normal);
    }
}

#[test]
fn test_missing_method_is_a_resolution_failure() {
    for mode in MODES {
        let (proxy, _server, _root) = connect(mode);
        let reports = observe(&proxy, ErrorVerdict::Accept);

        let (ok, value) = proxy.invoke(Handle::NONE, "Missing.Method", &[]);
        assert!(!ok);
        assert_eq!(value, DynamicValue::Empty);
        assert_eq!(proxy.state(), ProxyState::Normal, "{mode:?}");

        let reports = reports.borrow();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].code, Some(status::DISP_E_UNKNOWNNAME));
        assert_eq!(reports[0].class, Some(FailureClass::Recoverable));
        assert_eq!(reports[0].context.as_deref(), Some("Missing.Method"));
    }
}

#[test]
fn test_nested_path_with_literal_arguments() {
    for mode in MODES {
        let (proxy, server, _root) = connect_to(mode, "Excel.Application");
        let path = r#"ActiveSheet.Range("A1").Font.Bold"#;

        assert!(proxy.set_property(Handle::NONE, path, true.into()));
        assert_eq!(proxy.property(Handle::NONE, path), Some(DynamicValue::Bool(true)));

        // intermediates come from the cache the second time
        let gets = count_calls(&server, CallKind::Get);
        assert_eq!(proxy.property(Handle::NONE, path), Some(DynamicValue::Bool(true)));
        assert_eq!(count_calls(&server, CallKind::Get), gets + 1);

        let sheet = proxy.find_cached("activesheet", Handle::NONE).unwrap();
        assert!(proxy.find_cached(r#"RANGE("A1")"#, sheet).is_some());
        assert!(proxy.find_cached(r#"Range("a1")"#, sheet).is_none());
    }
}

#[test]
fn test_invoke_arguments() {
    for mode in MODES {
        let (proxy, _server, _root) = connect(mode);
        let args: Vec<DynamicValue> = (1..=3).map(DynamicValue::from).collect();
        assert_eq!(
            proxy.invoke(Handle::NONE, "Sum", &args),
            (true, DynamicValue::Int(6))
        );
        // literal arguments in the path come first
        assert_eq!(
            proxy.invoke(Handle::NONE, "ArgCount(1, \"two\")", &[3.into()]),
            (true, DynamicValue::Int(3))
        );
        assert_eq!(
            proxy.invoke(Handle::NONE, "Echo", &["hi".into()]),
            (true, DynamicValue::from_string("hi"))
        );
    }
}

#[test]
fn test_too_many_arguments() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let reports = observe(&proxy, ErrorVerdict::Accept);
        server.clear_calls();

        let args: Vec<DynamicValue> = (0..9).map(DynamicValue::from).collect();
        assert_eq!(proxy.invoke(Handle::NONE, "Sum", &args), (false, DynamicValue::Empty));
        assert!(matches!(
            proxy.try_invoke(Handle::NONE, "Sum", &args),
            Err(CallError::Marshal(_))
        ));
        // path literals count toward the limit
        let seven: Vec<DynamicValue> = (0..7).map(DynamicValue::from).collect();
        assert!(!proxy.invoke(Handle::NONE, "Sum(1, 2)", &seven).0);
        assert!(proxy.invoke(Handle::NONE, "Sum(1)", &seven).0);

        assert_eq!(count_calls(&server, CallKind::Call), 1);
        assert_eq!(proxy.state(), ProxyState::Normal);
        let reports = reports.borrow();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.code.is_none()));
    }
}

#[test]
fn test_bad_path_syntax() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        server.clear_calls();
        let err = proxy.try_resolve(Handle::NONE, "Child..Name").unwrap_err();
        assert!(matches!(err, CallError::Resolution { code: None, .. }), "{err:?}");
        assert!(server.calls().is_empty());
        assert_eq!(proxy.state(), ProxyState::Normal);
    }
}

#[test]
fn test_scalar_values() {
    let date = NaiveDate::from_ymd_opt(2024, 2, 29)
        .unwrap()
        .and_hms_milli_opt(13, 45, 7, 250)
        .unwrap();
    let values = [
        DynamicValue::Empty,
        DynamicValue::Bool(false),
        DynamicValue::Int(-17),
        DynamicValue::Double(0.1),
        DynamicValue::from_string(""),
        DynamicValue::Date(date),
    ];
    for mode in MODES {
        let (proxy, _server, root) = connect(mode);
        let child = proxy.resolve(root, "Child").unwrap();
        for value in &values {
            assert!(proxy.set_property(child, "Value", value.clone()));
            assert_eq!(&proxy.get_property(child, "Value").unwrap(), value);
        }
    }
}

#[test]
fn test_grid_values() {
    for mode in MODES {
        let (proxy, server, _root) = connect_to(mode, "Excel.Application");
        let path = r#"ActiveSheet.Range("A1:C2").Value"#;
        let items: Vec<DynamicValue> = vec![
            1.into(),
            2.into(),
            3.into(),
            "a".into(),
            DynamicValue::Empty,
            true.into(),
        ];

        assert!(proxy.set_property_grid(Handle::NONE, path, &items, 3, 2));
        let grid = proxy.get_property_grid(Handle::NONE, path).unwrap();
        assert_eq!((grid.width, grid.height), (3, 2));
        assert_eq!(grid.get(0, 2), Some(&DynamicValue::Int(3)));
        assert_eq!(grid.get(1, 0), Some(&DynamicValue::from_string("a")));
        assert_eq!(grid.cells, items);
        assert_eq!(
            proxy.get_property(Handle::NONE, path).unwrap(),
            DynamicValue::List(items.clone())
        );

        // short input is rejected before anything is sent
        let puts = count_calls(&server, CallKind::Put);
        assert!(!proxy.set_property_grid(Handle::NONE, path, &items[..5], 3, 2));
        assert_eq!(count_calls(&server, CallKind::Put), puts);
        assert_eq!(proxy.state(), ProxyState::Normal);

        let cell = proxy
            .get_property_grid(Handle::NONE, r#"ActiveSheet.Range("Z9").Value"#)
            .unwrap();
        assert_eq!(cell.cells, vec![DynamicValue::Empty]);
    }
}

#[test]
fn test_methods_returning_objects() {
    for mode in MODES {
        let (proxy, _server, _root) = connect_to(mode, "Excel.Application");
        let (ok, book) = proxy.invoke(Handle::NONE, "Workbooks.Add", &[]);
        assert!(ok);
        let book = book.as_handle().expect("Add returns a workbook");
        assert!(proxy.owned_handles().contains(&book));

        let (ok, _) = proxy.invoke(book, "SaveAs", &["/tmp/out.xlsx".into()]);
        assert!(ok);
        assert_eq!(
            proxy.property(book, "FullName"),
            Some(DynamicValue::from_string("/tmp/out.xlsx"))
        );
        assert_eq!(proxy.property(Handle::NONE, "Workbooks.Count"), Some(1.into()));
    }
}

#[test]
fn test_calls_run_on_the_owning_thread() {
    for mode in MODES {
        let (proxy, server, _root) = connect(mode);
        let child = proxy.resolve(Handle::NONE, "Child").unwrap();
        proxy.set_property(child, "Value", 1.into());
        proxy.invoke(Handle::NONE, "Echo", &[2.into()]);
        proxy.disconnect();

        let events = server.calls();
        assert!(events.iter().any(|e| e.kind == CallKind::Create));
        assert!(events.iter().any(|e| e.kind == CallKind::Release));
        assert_not_interleaved(&events);
        match mode {
            crate::Mode::Inline => {
                let me = thread::current().id();
                assert!(events.iter().all(|e| e.thread == me));
            }
            crate::Mode::Worker => {
                assert!(events
                    .iter()
                    .all(|e| e.thread_name.as_deref() == Some(WORKER_NAME)));
            }
        }
    }
}
