//! In-process automation server backed by an object graph in memory.
//!
//! Used by the tests and the CLI's `memory` backend. Classes are registered
//! by name as [`ObjectTemplate`]s; `create` instantiates one. Objects behave
//! like late-bound automation objects: members are matched
//! case-insensitively, any property can be written (expando), every
//! object-valued result is a fresh handle that must be released, and
//! `get` on a method name invokes it.
//!
//! The server is a cheap cloneable handle to shared state, so a test can keep
//! a clone to inspect calls and inject faults while the proxy owns another.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use ahash::AHashMap;
use dispatch_protocol::{status, Handle, StatusCode, WireValue};
use parking_lot::Mutex;

use super::AutomationServer;
use crate::error::ServerError;

/// Method implementation. Receives the object it was called on.
pub type MethodFn =
    Arc<dyn Fn(&mut MethodContext<'_>, &[WireValue]) -> Result<WireValue, ServerError> + Send + Sync>;

/// Blueprint for an object: initial values, child objects, indexed child
/// collections (`Range("A1")`), and methods.
#[derive(Clone, Default)]
pub struct ObjectTemplate {
    values: Vec<(String, WireValue)>,
    children: Vec<(String, ObjectTemplate)>,
    indexed: Vec<(String, ObjectTemplate)>,
    methods: Vec<(String, MethodFn)>,
}

impl ObjectTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, name: &str, value: WireValue) -> Self {
        self.values.push((name.to_string(), value));
        self
    }

    pub fn child(mut self, name: &str, template: ObjectTemplate) -> Self {
        self.children.push((name.to_string(), template));
        self
    }

    /// A member that takes arguments and yields one object per distinct
    /// argument list, created on first access.
    pub fn indexed(mut self, name: &str, template: ObjectTemplate) -> Self {
        self.indexed.push((name.to_string(), template));
        self
    }

    pub fn method<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&mut MethodContext<'_>, &[WireValue]) -> Result<WireValue, ServerError>
            + Send
            + Sync
            + 'static,
    {
        self.methods.push((name.to_string(), Arc::new(f)));
        self
    }
}

/// Which server entry point a [`CallEvent`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Create,
    Get,
    Put,
    Call,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Begin,
    End,
}

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
    pub kind: CallKind,
    pub phase: Phase,
    pub member: String,
    pub thread: ThreadId,
    pub thread_name: Option<String>,
}

type ObjectId = usize;

enum Prop {
    Value(WireValue),
    Object(ObjectId),
}

#[derive(Default)]
struct Object {
    props: AHashMap<String, Prop>,
    methods: AHashMap<String, MethodFn>,
    indexed: AHashMap<String, ObjectTemplate>,
    instances: AHashMap<String, ObjectId>,
}

struct Fault {
    member: String,
    code: StatusCode,
    remaining: Option<usize>,
}

#[derive(Default)]
struct MemoryState {
    classes: AHashMap<String, ObjectTemplate>,
    objects: Vec<Object>,
    refs: AHashMap<Handle, ObjectId>,
    next_handle: u64,
    faults: Vec<Fault>,
    log: Vec<CallEvent>,
    released: Vec<Handle>,
}

impl MemoryState {
    fn instantiate(&mut self, template: &ObjectTemplate) -> ObjectId {
        let id = self.objects.len();
        self.objects.push(Object::default());
        let mut object = Object::default();
        for (name, value) in &template.values {
            object
                .props
                .insert(name.to_lowercase(), Prop::Value(value.clone()));
        }
        for (name, child) in &template.children {
            let child = self.instantiate(child);
            object.props.insert(name.to_lowercase(), Prop::Object(child));
        }
        for (name, t) in &template.indexed {
            object.indexed.insert(name.to_lowercase(), t.clone());
        }
        for (name, f) in &template.methods {
            object.methods.insert(name.to_lowercase(), Arc::clone(f));
        }
        self.objects[id] = object;
        id
    }

    fn issue(&mut self, object: ObjectId) -> Handle {
        self.next_handle += 1;
        let handle = Handle(self.next_handle);
        self.refs.insert(handle, object);
        handle
    }

    fn object(&self, handle: Handle) -> Result<ObjectId, ServerError> {
        self.refs
            .get(&handle)
            .copied()
            .ok_or_else(|| ServerError::new(status::E_HANDLE, format!("invalid handle {handle}")))
    }

    fn record(&mut self, kind: CallKind, phase: Phase, member: &str) {
        let current = thread::current();
        self.log.push(CallEvent {
            kind,
            phase,
            member: member.to_string(),
            thread: current.id(),
            thread_name: current.name().map(str::to_string),
        });
    }

    fn check_fault(&mut self, member: &str) -> Result<(), ServerError> {
        let member = member.to_lowercase();
        let Some(index) = self.faults.iter().position(|f| f.member == member) else {
            return Ok(());
        };
        let fault = &mut self.faults[index];
        let code = fault.code;
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(index);
            }
        }
        Err(ServerError::new(code, format!("injected failure in '{member}'")))
    }

    fn get(&mut self, target: Handle, member: &str, args: &[WireValue]) -> Result<WireValue, ServerError> {
        let id = self.object(target)?;
        let key = member.to_lowercase();

        if let Some(template) = self.objects[id].indexed.get(&key).cloned() {
            if args.is_empty() {
                return Err(ServerError::new(
                    status::DISP_E_BADPARAMCOUNT,
                    format!("'{member}' requires an index"),
                ));
            }
            let instance_key = render_args(args);
            let child = match self.objects[id].instances.get(&instance_key).copied() {
                Some(child) => child,
                None => {
                    let child = self.instantiate(&template);
                    self.objects[id].instances.insert(instance_key, child);
                    child
                }
            };
            return Ok(WireValue::Dispatch(self.issue(child)));
        }

        if let Some(method) = self.objects[id].methods.get(&key).cloned() {
            return method(&mut MethodContext { state: self, this: id }, args);
        }

        if !args.is_empty() {
            return Err(ServerError::new(
                status::DISP_E_BADPARAMCOUNT,
                format!("'{member}' takes no arguments"),
            ));
        }
        let child = match self.objects[id].props.get(&key) {
            Some(Prop::Value(v)) => return Ok(v.clone()),
            Some(Prop::Object(child)) => *child,
            None => return Err(unknown_name(member)),
        };
        Ok(WireValue::Dispatch(self.issue(child)))
    }

    fn put(
        &mut self,
        target: Handle,
        member: &str,
        args: &[WireValue],
        value: WireValue,
    ) -> Result<(), ServerError> {
        let id = self.object(target)?;
        let key = member.to_lowercase();
        if !args.is_empty() {
            return Err(ServerError::new(
                status::DISP_E_BADPARAMCOUNT,
                format!("'{member}' is not an indexed property"),
            ));
        }
        if self.objects[id].methods.contains_key(&key) {
            return Err(ServerError::new(
                status::DISP_E_MEMBERNOTFOUND,
                format!("'{member}' is a method"),
            ));
        }
        let prop = match value.as_dispatch() {
            Some(handle) => Prop::Object(self.object(handle)?),
            None => Prop::Value(value),
        };
        self.objects[id].props.insert(key, prop);
        Ok(())
    }

    fn call(&mut self, target: Handle, member: &str, args: &[WireValue]) -> Result<WireValue, ServerError> {
        let id = self.object(target)?;
        let key = member.to_lowercase();
        match self.objects[id].methods.get(&key).cloned() {
            Some(method) => method(&mut MethodContext { state: self, this: id }, args),
            None if self.objects[id].props.contains_key(&key)
                || self.objects[id].indexed.contains_key(&key) =>
            {
                Err(ServerError::new(
                    status::DISP_E_MEMBERNOTFOUND,
                    format!("'{member}' is not a method"),
                ))
            }
            None => Err(unknown_name(member)),
        }
    }
}

fn unknown_name(member: &str) -> ServerError {
    ServerError::new(status::DISP_E_UNKNOWNNAME, format!("unknown name '{member}'"))
}

fn render_args(args: &[WireValue]) -> String {
    args.iter()
        .map(|a| match a {
            WireValue::Bstr(s) => format!("{s:?}"),
            WireValue::I2(n) => n.to_string(),
            WireValue::I4(n) => n.to_string(),
            WireValue::I8(n) => n.to_string(),
            WireValue::R8(n) => n.to_string(),
            other => format!("{other:?}"),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// What a method sees of the object it runs on.
pub struct MethodContext<'a> {
    state: &'a mut MemoryState,
    this: ObjectId,
}

impl MethodContext<'_> {
    /// Read a plain value property of this object.
    pub fn get(&self, name: &str) -> Option<WireValue> {
        match self.state.objects[self.this].props.get(&name.to_lowercase()) {
            Some(Prop::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn set(&mut self, name: &str, value: WireValue) {
        self.state.objects[self.this]
            .props
            .insert(name.to_lowercase(), Prop::Value(value));
    }

    /// Create a new object and return a handle to it.
    pub fn spawn(&mut self, template: &ObjectTemplate) -> WireValue {
        let id = self.state.instantiate(template);
        WireValue::Dispatch(self.state.issue(id))
    }

    /// Create a new object and also keep it as property `name` of this one.
    pub fn spawn_child(&mut self, name: &str, template: &ObjectTemplate) -> WireValue {
        let id = self.state.instantiate(template);
        self.state.objects[self.this]
            .props
            .insert(name.to_lowercase(), Prop::Object(id));
        WireValue::Dispatch(self.state.issue(id))
    }
}

/// In-memory [`AutomationServer`].
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(self, name: &str, template: ObjectTemplate) -> Self {
        self.register(name, template);
        self
    }

    pub fn register(&self, name: &str, template: ObjectTemplate) {
        self.state
            .lock()
            .classes
            .insert(name.to_lowercase(), template);
    }

    /// Make every access to `member` fail with `code` until cleared.
    pub fn fail(&self, member: &str, code: StatusCode) {
        self.add_fault(member, code, None);
    }

    /// Make the next `times` accesses to `member` fail with `code`.
    pub fn fail_times(&self, member: &str, code: StatusCode, times: usize) {
        if times > 0 {
            self.add_fault(member, code, Some(times));
        }
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    fn add_fault(&self, member: &str, code: StatusCode, remaining: Option<usize>) {
        self.state.lock().faults.push(Fault {
            member: member.to_lowercase(),
            code,
            remaining,
        });
    }

    pub fn calls(&self) -> Vec<CallEvent> {
        self.state.lock().log.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().log.clear();
    }

    /// Handles released so far, in order.
    pub fn released(&self) -> Vec<Handle> {
        self.state.lock().released.clone()
    }

    /// Handles issued and not yet released, sorted.
    pub fn live_handles(&self) -> Vec<Handle> {
        let mut live: Vec<Handle> = self.state.lock().refs.keys().copied().collect();
        live.sort_unstable();
        live
    }

    /// Read a plain value property without going through the call log.
    pub fn peek(&self, handle: Handle, member: &str) -> Option<WireValue> {
        let state = self.state.lock();
        let id = *state.refs.get(&handle)?;
        match state.objects[id].props.get(&member.to_lowercase()) {
            Some(Prop::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }

    fn traced<R>(
        &self,
        kind: CallKind,
        member: &str,
        op: impl FnOnce(&mut MemoryState) -> Result<R, ServerError>,
    ) -> Result<R, ServerError> {
        let mut state = self.state.lock();
        state.record(kind, Phase::Begin, member);
        let result = state.check_fault(member).and_then(|()| op(&mut *state));
        state.record(kind, Phase::End, member);
        result
    }

    /// A small spreadsheet application object model for demos.
    pub fn spreadsheet() -> Self {
        let font = ObjectTemplate::new()
            .value("Name", WireValue::Bstr("Calibri".into()))
            .value("Size", WireValue::R8(11.0))
            .value("Bold", WireValue::Bool(false))
            .value("Italic", WireValue::Bool(false))
            .value("Color", WireValue::I4(0));
        let interior = ObjectTemplate::new().value("Color", WireValue::I4(0xFF_FF_FF));
        let range = ObjectTemplate::new()
            .value("Value", WireValue::Empty)
            .value("Formula", WireValue::Bstr(String::new()))
            .value("NumberFormat", WireValue::Bstr("General".into()))
            .child("Font", font)
            .child("Interior", interior)
            .method("Clear", |ctx, _| {
                ctx.set("Value", WireValue::Empty);
                ctx.set("Formula", WireValue::Bstr(String::new()));
                Ok(WireValue::Bool(true))
            });
        let sheet = ObjectTemplate::new()
            .value("Name", WireValue::Bstr("Sheet1".into()))
            .indexed("Range", range.clone())
            .indexed("Cells", range)
            .method("Activate", |_, _| Ok(WireValue::Bool(true)));
        let workbook = ObjectTemplate::new()
            .value("Name", WireValue::Bstr("Book1".into()))
            .value("FullName", WireValue::Bstr("Book1".into()))
            .value("Saved", WireValue::Bool(false))
            .child("ActiveSheet", sheet.clone())
            .indexed("Worksheets", sheet.clone())
            .method("SaveAs", |ctx, args| {
                let Some(WireValue::Bstr(path)) = args.first() else {
                    return Err(ServerError::new(
                        status::DISP_E_TYPEMISMATCH,
                        "SaveAs expects a file name",
                    ));
                };
                ctx.set("FullName", WireValue::Bstr(path.clone()));
                ctx.set("Saved", WireValue::Bool(true));
                Ok(WireValue::Empty)
            })
            .method("Close", |ctx, _| {
                ctx.set("Saved", WireValue::Bool(true));
                Ok(WireValue::Bool(true))
            });
        let add_workbook = workbook.clone();
        let workbooks = ObjectTemplate::new()
            .value("Count", WireValue::I4(0))
            .method("Add", move |ctx, _| {
                let count = match ctx.get("Count") {
                    Some(WireValue::I4(n)) => n,
                    _ => 0,
                };
                ctx.set("Count", WireValue::I4(count + 1));
                Ok(ctx.spawn(&add_workbook))
            });
        let application = ObjectTemplate::new()
            .value("Name", WireValue::Bstr("Memory Spreadsheet".into()))
            .value("Visible", WireValue::Bool(false))
            .value("DisplayAlerts", WireValue::Bool(true))
            .child("Workbooks", workbooks)
            .child("ActiveWorkbook", workbook)
            .child("ActiveSheet", sheet)
            .method("Calculate", |_, _| Ok(WireValue::Empty))
            .method("Quit", |_, _| Ok(WireValue::Empty));
        Self::new().with_class("Excel.Application", application)
    }
}

impl AutomationServer for MemoryServer {
    fn create(&mut self, name: &str) -> Result<Handle, ServerError> {
        self.traced(CallKind::Create, name, |state| {
            let template = state
                .classes
                .get(&name.to_lowercase())
                .cloned()
                .ok_or_else(|| {
                    ServerError::new(status::CO_E_CLASSSTRING, format!("invalid class string '{name}'"))
                })?;
            let id = state.instantiate(&template);
            Ok(state.issue(id))
        })
    }

    fn get(&mut self, target: Handle, member: &str, args: &[WireValue]) -> Result<WireValue, ServerError> {
        self.traced(CallKind::Get, member, |state| state.get(target, member, args))
    }

    fn put(
        &mut self,
        target: Handle,
        member: &str,
        args: &[WireValue],
        value: WireValue,
    ) -> Result<(), ServerError> {
        self.traced(CallKind::Put, member, |state| {
            state.put(target, member, args, value)
        })
    }

    fn call(&mut self, target: Handle, member: &str, args: &[WireValue]) -> Result<WireValue, ServerError> {
        self.traced(CallKind::Call, member, |state| state.call(target, member, args))
    }

    fn release(&mut self, handle: Handle) -> Result<(), ServerError> {
        let mut state = self.state.lock();
        state.record(CallKind::Release, Phase::Begin, "");
        let result = match state.refs.remove(&handle) {
            Some(_) => {
                state.released.push(handle);
                Ok(())
            }
            None => Err(ServerError::new(
                status::E_HANDLE,
                format!("release of unknown handle {handle}"),
            )),
        };
        state.record(CallKind::Release, Phase::End, "");
        result
    }
}
