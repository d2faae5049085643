//! Late-bound calls through IDispatch.
//!
//! Every failure carries the HRESULT the server returned, so the proxy on the
//! other side of the pipe can classify it. For `DISP_E_EXCEPTION` the code
//! and text from EXCEPINFO are used instead.

#![cfg(windows)]

use std::ptr;

use dispatch_protocol::StatusCode;
use windows::{
    core::{GUID, HSTRING, PCWSTR},
    Win32::{
        Foundation::DISP_E_EXCEPTION,
        Globalization::GetSystemDefaultLCID,
        System::{
            Com::{
                CLSIDFromProgID, CoCreateInstance, IDispatch, CLSCTX_LOCAL_SERVER, DISPATCH_FLAGS,
                DISPATCH_METHOD, DISPATCH_PROPERTYGET, DISPATCH_PROPERTYPUT, DISPPARAMS, EXCEPINFO,
            },
            Ole::DISPID_PROPERTYPUT,
            Variant::VARIANT,
        },
    },
};

use crate::variant::Variants;

/// A failed automation call.
#[derive(Debug)]
pub struct ComError {
    pub code: StatusCode,
    pub message: String,
}

impl ComError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_windows(err: &windows::core::Error, context: &str) -> Self {
        Self::new(StatusCode(err.code().0), format!("{context} failed: {}", err.message()))
    }
}

/// Create a COM object from a ProgID string (e.g., "Excel.Application").
pub fn create(prog_id: &str) -> Result<IDispatch, ComError> {
    unsafe {
        let hstr = HSTRING::from(prog_id);
        let clsid = CLSIDFromProgID(&hstr)
            .map_err(|e| ComError::from_windows(&e, &format!("CLSIDFromProgID('{prog_id}')")))?;
        CoCreateInstance(&clsid, None, CLSCTX_LOCAL_SERVER)
            .map_err(|e| ComError::from_windows(&e, &format!("CoCreateInstance('{prog_id}')")))
    }
}

/// Property get. Members that are really methods without arguments are
/// accepted too, as script hosts do.
pub fn get(disp: &IDispatch, name: &str, mut args: Variants) -> Result<VARIANT, ComError> {
    args.0.reverse();
    let flags = DISPATCH_FLAGS(DISPATCH_PROPERTYGET.0 | DISPATCH_METHOD.0);
    invoke(disp, name, flags, &mut args, false)
}

/// Property put; `args` index the property (`Range("A1:B2").Value`).
pub fn put(disp: &IDispatch, name: &str, mut args: Variants, value: VARIANT) -> Result<(), ComError> {
    // DISPPARAMS wants arguments last to first, with the named put value at 0
    args.0.reverse();
    args.0.insert(0, value);
    invoke(disp, name, DISPATCH_PROPERTYPUT, &mut args, true).map(|_| ())
}

/// Method call with positional arguments in natural order.
pub fn call(disp: &IDispatch, name: &str, mut args: Variants) -> Result<VARIANT, ComError> {
    args.0.reverse();
    invoke(disp, name, DISPATCH_METHOD, &mut args, false)
}

fn dispid(disp: &IDispatch, name: &str) -> Result<i32, ComError> {
    unsafe {
        let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
        let names = [PCWSTR(wide.as_ptr())];
        let mut dispid = 0i32;
        disp.GetIDsOfNames(
            &GUID::zeroed(),
            names.as_ptr(),
            1,
            GetSystemDefaultLCID(),
            &mut dispid,
        )
        .map_err(|e| ComError::from_windows(&e, &format!("GetIDsOfNames('{name}')")))?;
        Ok(dispid)
    }
}

/// `args` must already be in DISPPARAMS order.
fn invoke(
    disp: &IDispatch,
    name: &str,
    flags: DISPATCH_FLAGS,
    args: &mut Variants,
    is_put: bool,
) -> Result<VARIANT, ComError> {
    let id = dispid(disp, name)?;
    let mut named_args = [DISPID_PROPERTYPUT];
    let params = DISPPARAMS {
        rgvarg: if args.0.is_empty() {
            ptr::null_mut()
        } else {
            args.0.as_mut_ptr()
        },
        rgdispidNamedArgs: if is_put {
            named_args.as_mut_ptr()
        } else {
            ptr::null_mut()
        },
        cArgs: args.0.len() as u32,
        cNamedArgs: u32::from(is_put),
    };
    let mut result = VARIANT::default();
    let mut except = EXCEPINFO::default();
    unsafe {
        disp.Invoke(
            id,
            &GUID::zeroed(),
            GetSystemDefaultLCID(),
            flags,
            &params,
            if is_put { None } else { Some(&mut result) },
            Some(&mut except),
            None,
        )
    }
    .map_err(|e| invoke_error(&e, &except, name))?;
    Ok(result)
}

fn invoke_error(err: &windows::core::Error, except: &EXCEPINFO, member: &str) -> ComError {
    if err.code() != DISP_E_EXCEPTION {
        return ComError::from_windows(err, &format!("Invoke('{member}')"));
    }
    let code = if except.scode != 0 {
        StatusCode(except.scode)
    } else {
        StatusCode(DISP_E_EXCEPTION.0)
    };
    let desc = if except.bstrDescription.is_empty() {
        String::from("(no description)")
    } else {
        except.bstrDescription.to_string()
    };
    let source = if except.bstrSource.is_empty() {
        String::from("(no source)")
    } else {
        except.bstrSource.to_string()
    };
    ComError::new(
        code,
        format!("exception in '{member}': {desc} (source: {source})"),
    )
}
