//! Dispatch bridge: a Windows process that hosts automation objects and
//! exposes late-bound get/put/call on them, controlled by JSON commands over
//! stdin/stdout.
//!
//! Designed to be cross-compiled from Linux and run under WINE.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! - Reads `Request` objects from stdin
//! - Writes `Response` objects to stdout
//! - Diagnostic/log messages go to stderr (never stdout)

#[cfg(windows)]
mod dispatch;
mod objects;
#[cfg(windows)]
mod variant;

#[cfg(not(windows))]
fn main() {
    eprintln!("dispatch-bridge must be compiled for Windows (--target x86_64-pc-windows-gnu)");
    eprintln!("and run under WINE on Linux.");
    std::process::exit(1);
}

#[cfg(windows)]
fn main() {
    use std::io::{self, BufRead};

    use dispatch_protocol::{status, Command, Request, Response};

    // Use stderr for all diagnostic output so stdout stays clean for protocol
    eprintln!("[dispatch-bridge] Starting up...");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut bridge = bridge::Bridge::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("[dispatch-bridge] stdin read error: {e}");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("[dispatch-bridge] JSON parse error: {e}");
                eprintln!("[dispatch-bridge] Line was: {line}");
                // id 0: the request could not be read, so its id is unknown
                let resp = Response::error(0, status::E_INVALIDARG, format!("JSON parse error: {e}"));
                bridge::write_response(&mut out, &resp);
                continue;
            }
        };

        let response = bridge.handle(&request);
        bridge::write_response(&mut out, &response);

        if matches!(request.command, Command::Shutdown) {
            eprintln!("[dispatch-bridge] Shutdown complete, exiting.");
            break;
        }
    }

    // stdin closed without a shutdown: still release everything we hold
    bridge.shutdown();
    eprintln!("[dispatch-bridge] Process exiting.");
}

#[cfg(windows)]
mod bridge {
    use std::io::Write;

    use dispatch_protocol::{status, Command, Handle, Request, Response, ResponseData, WireValue};
    use windows::Win32::System::Com::{
        CoInitializeEx, CoUninitialize, IDispatch, COINIT_APARTMENTTHREADED,
    };

    use crate::dispatch::{self, ComError};
    use crate::objects::HandleTable;
    use crate::variant::{from_variant, to_variant, OwnedVariant, Variants};

    pub struct Bridge {
        com_initialized: bool,
        objects: HandleTable<IDispatch>,
    }

    impl Bridge {
        pub fn new() -> Self {
            Self {
                com_initialized: false,
                objects: HandleTable::new(),
            }
        }

        pub fn handle(&mut self, request: &Request) -> Response {
            match self.execute(&request.command) {
                Ok(data) => Response::ok(request.id, data),
                Err(e) => {
                    eprintln!("[dispatch-bridge] request {} failed: {} ({})", request.id, e.message, e.code);
                    Response::error(request.id, e.code, e.message)
                }
            }
        }

        fn execute(&mut self, command: &Command) -> Result<Option<ResponseData>, ComError> {
            match command {
                Command::Init => {
                    self.init()?;
                    Ok(None)
                }
                Command::Create { prog_id } => {
                    self.require_com()?;
                    let disp = dispatch::create(prog_id)?;
                    let handle = self.objects.insert(disp);
                    eprintln!("[dispatch-bridge] Created '{prog_id}' as handle {handle}");
                    Ok(Some(ResponseData::Handle { handle }))
                }
                Command::Get {
                    target,
                    member,
                    args,
                } => {
                    let disp = self.object(*target)?;
                    let result = dispatch::get(&disp, member, self.variants(args)?)?;
                    self.value(OwnedVariant(result))
                }
                Command::Put {
                    target,
                    member,
                    args,
                    value,
                } => {
                    let disp = self.object(*target)?;
                    let args = self.variants(args)?;
                    let value = to_variant(value, &self.objects)?;
                    dispatch::put(&disp, member, args, value)?;
                    Ok(None)
                }
                Command::Call {
                    target,
                    member,
                    args,
                } => {
                    let disp = self.object(*target)?;
                    let result = dispatch::call(&disp, member, self.variants(args)?)?;
                    self.value(OwnedVariant(result))
                }
                Command::Release { handle } => match self.objects.remove(*handle) {
                    Some(_) => Ok(None),
                    None => Err(ComError::new(
                        status::E_HANDLE,
                        format!("release of unknown handle {handle}"),
                    )),
                },
                Command::Shutdown => {
                    self.shutdown();
                    Ok(None)
                }
            }
        }

        fn init(&mut self) -> Result<(), ComError> {
            if self.com_initialized {
                return Ok(());
            }
            unsafe {
                CoInitializeEx(None, COINIT_APARTMENTTHREADED)
                    .ok()
                    .map_err(|e| ComError::from_windows(&e, "CoInitializeEx"))?;
            }
            self.com_initialized = true;
            eprintln!("[dispatch-bridge] COM initialized (STA)");
            Ok(())
        }

        fn require_com(&self) -> Result<(), ComError> {
            if self.com_initialized {
                Ok(())
            } else {
                Err(ComError::new(status::E_FAIL, "COM not initialized; send Init first"))
            }
        }

        /// The object behind `handle`, AddRef'd for the duration of a call.
        fn object(&self, handle: Handle) -> Result<IDispatch, ComError> {
            self.objects
                .get(handle)
                .cloned()
                .ok_or_else(|| ComError::new(status::E_HANDLE, format!("invalid handle {handle}")))
        }

        fn variants(&self, args: &[WireValue]) -> Result<Variants, ComError> {
            let mut out = Variants(Vec::with_capacity(args.len()));
            for arg in args {
                out.0.push(to_variant(arg, &self.objects)?);
            }
            Ok(out)
        }

        fn value(&mut self, result: OwnedVariant) -> Result<Option<ResponseData>, ComError> {
            let value = from_variant(&result.0, &mut self.objects)?;
            Ok(Some(ResponseData::Value { value }))
        }

        pub fn shutdown(&mut self) {
            if !self.com_initialized {
                return;
            }
            let leftover = self.objects.len();
            self.objects.clear();
            if leftover > 0 {
                eprintln!("[dispatch-bridge] Released {leftover} objects left open by the client");
            }
            unsafe { CoUninitialize() };
            self.com_initialized = false;
            eprintln!("[dispatch-bridge] COM uninitialized");
        }
    }

    pub fn write_response(out: &mut impl Write, response: &Response) {
        let json = serde_json::to_string(response).unwrap_or_else(|e| {
            eprintln!("[dispatch-bridge] failed to encode response {}: {e}", response.id);
            format!(
                r#"{{"id":{},"status":"error","code":{},"message":"unencodable response"}}"#,
                response.id,
                status::E_FAIL.0
            )
        });
        let _ = writeln!(out, "{json}");
        let _ = out.flush();
    }
}
