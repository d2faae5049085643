//! Conversion between wire values and VARIANTs.
//!
//! VARIANTs built here own their contents (BSTRs, AddRef'd interfaces,
//! SAFEARRAYs). Keep them in an [`OwnedVariant`] or [`Variants`] so they are
//! cleared on every exit path.

#![cfg(windows)]

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::ptr;

use dispatch_protocol::{status, Dimension, SafeArray, WireValue};
use windows::{
    core::BSTR,
    Win32::{
        Foundation::VARIANT_BOOL,
        System::{
            Com::{IDispatch, CY, SAFEARRAY, SAFEARRAYBOUND},
            Ole::{
                SafeArrayCreate, SafeArrayDestroy, SafeArrayGetDim, SafeArrayGetElement,
                SafeArrayGetLBound, SafeArrayGetUBound, SafeArrayPutElement,
            },
            Variant::{
                VariantClear, VARENUM, VARIANT, VT_ARRAY, VT_BOOL, VT_BSTR, VT_BYREF, VT_CY,
                VT_DATE, VT_DISPATCH, VT_EMPTY, VT_ERROR, VT_I2, VT_I4, VT_I8, VT_INT, VT_NULL,
                VT_R4, VT_R8, VT_UI1, VT_UI2, VT_UI4, VT_UINT, VT_VARIANT,
            },
        },
    },
};

use crate::dispatch::ComError;
use crate::objects::HandleTable;

/// A VARIANT cleared on drop.
pub struct OwnedVariant(pub VARIANT);

impl Drop for OwnedVariant {
    fn drop(&mut self) {
        unsafe {
            let _ = VariantClear(&mut self.0);
        }
    }
}

/// Argument VARIANTs, cleared on drop.
pub struct Variants(pub Vec<VARIANT>);

impl Drop for Variants {
    fn drop(&mut self) {
        for v in &mut self.0 {
            unsafe {
                let _ = VariantClear(v);
            }
        }
    }
}

// The VARIANT struct wraps inner unions in ManuallyDrop, so we use ptr::write
// to set fields without triggering the DerefMut lint.
macro_rules! variant {
    ($vt:expr, $field:ident, $value:expr) => {{
        let mut v = VARIANT::default();
        unsafe {
            let inner = &mut *v.Anonymous.Anonymous;
            ptr::write(&mut inner.vt, $vt);
            ptr::write(&mut inner.Anonymous.$field, $value);
        }
        v
    }};
}

fn variant_of_type(vt: VARENUM) -> VARIANT {
    let mut v = VARIANT::default();
    unsafe {
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.vt, vt);
    }
    v
}

pub fn to_variant(value: &WireValue, objects: &HandleTable<IDispatch>) -> Result<VARIANT, ComError> {
    let v = match value {
        WireValue::Empty => VARIANT::default(),
        WireValue::Null => variant_of_type(VT_NULL),
        WireValue::Bool(b) => variant!(VT_BOOL, boolVal, VARIANT_BOOL(if *b { -1 } else { 0 })),
        WireValue::UI1(n) => variant!(VT_UI1, bVal, *n),
        WireValue::I2(n) => variant!(VT_I2, iVal, *n),
        WireValue::I4(n) => variant!(VT_I4, lVal, *n),
        WireValue::I8(n) => variant!(VT_I8, llVal, *n),
        WireValue::R4(n) => variant!(VT_R4, fltVal, *n),
        WireValue::R8(n) => variant!(VT_R8, dblVal, *n),
        WireValue::Currency(n) => variant!(VT_CY, cyVal, CY { int64: *n }),
        WireValue::Date(d) => variant!(VT_DATE, date, *d),
        WireValue::Bstr(s) => variant!(VT_BSTR, bstrVal, ManuallyDrop::new(BSTR::from(s.as_str()))),
        WireValue::Dispatch(handle) => {
            let disp = objects.get(*handle).cloned().ok_or_else(|| {
                ComError::new(status::E_HANDLE, format!("invalid handle {handle}"))
            })?;
            variant!(VT_DISPATCH, pdispVal, ManuallyDrop::new(Some(disp)))
        }
        WireValue::Error(code) => variant!(VT_ERROR, scode, *code),
        WireValue::Array(array) => array_to_variant(array, objects)?,
    };
    Ok(v)
}

pub fn from_variant(
    v: &VARIANT,
    objects: &mut HandleTable<IDispatch>,
) -> Result<WireValue, ComError> {
    unsafe {
        let inner = &v.Anonymous.Anonymous;
        let vt = inner.vt;
        let val = &inner.Anonymous;

        if vt.0 == VT_ARRAY.0 | VT_VARIANT.0 {
            return array_from_variant(val.parray, objects);
        }
        if vt.0 == VT_BYREF.0 | VT_VARIANT.0 && !val.pvarVal.is_null() {
            return from_variant(&*val.pvarVal, objects);
        }

        let value = match vt {
            VT_EMPTY => WireValue::Empty,
            VT_NULL => WireValue::Null,
            VT_BOOL => WireValue::Bool(val.boolVal.0 != 0),
            VT_UI1 => WireValue::UI1(val.bVal),
            VT_I2 => WireValue::I2(val.iVal),
            VT_UI2 => WireValue::I4(i32::from(val.uiVal)),
            VT_I4 => WireValue::I4(val.lVal),
            VT_INT => WireValue::I4(val.intVal),
            VT_UI4 => WireValue::I8(i64::from(val.ulVal)),
            VT_UINT => WireValue::I8(i64::from(val.uintVal)),
            VT_I8 => WireValue::I8(val.llVal),
            VT_R4 => WireValue::R4(val.fltVal),
            VT_R8 => WireValue::R8(val.dblVal),
            VT_CY => WireValue::Currency(val.cyVal.int64),
            VT_DATE => WireValue::Date(val.date),
            VT_BSTR => WireValue::Bstr(val.bstrVal.to_string()),
            VT_ERROR => WireValue::Error(val.scode),
            VT_DISPATCH => match &*val.pdispVal {
                Some(disp) => WireValue::Dispatch(objects.insert(disp.clone())),
                None => WireValue::Null,
            },
            other => {
                return Err(ComError::new(
                    status::DISP_E_TYPEMISMATCH,
                    format!("unsupported VARIANT type {}", other.0),
                ))
            }
        };
        Ok(value)
    }
}

/// Natural-order indices of the element at `offset`, first index fastest.
fn indices_at(dims: &[Dimension], mut offset: usize) -> Vec<i32> {
    dims.iter()
        .map(|d| {
            let count = d.count.max(1) as usize;
            let index = d.lower + (offset % count) as i32;
            offset /= count;
            index
        })
        .collect()
}

fn array_to_variant(array: &SafeArray, objects: &HandleTable<IDispatch>) -> Result<VARIANT, ComError> {
    let bounds: Vec<SAFEARRAYBOUND> = array
        .dims()
        .iter()
        .map(|d| SAFEARRAYBOUND {
            cElements: d.count,
            lLbound: d.lower,
        })
        .collect();
    let psa = unsafe { SafeArrayCreate(VT_VARIANT, bounds.len() as u32, bounds.as_ptr()) };
    if psa.is_null() {
        return Err(ComError::new(status::E_FAIL, "SafeArrayCreate failed"));
    }

    for (offset, element) in array.elements().iter().enumerate() {
        let filled = to_variant(element, objects).and_then(|v| {
            let v = OwnedVariant(v);
            // SafeArrayPutElement wants the rightmost index first; it copies
            // the VARIANT, so ours is still cleared.
            let mut indices = indices_at(array.dims(), offset);
            indices.reverse();
            unsafe {
                SafeArrayPutElement(psa, indices.as_ptr(), &v.0 as *const VARIANT as *const c_void)
            }
            .map_err(|e| ComError::from_windows(&e, "SafeArrayPutElement"))
        });
        if let Err(e) = filled {
            unsafe {
                let _ = SafeArrayDestroy(psa);
            }
            return Err(e);
        }
    }

    let mut v = variant_of_type(VARENUM(VT_ARRAY.0 | VT_VARIANT.0));
    unsafe {
        let inner = &mut *v.Anonymous.Anonymous;
        ptr::write(&mut inner.Anonymous.parray, psa);
    }
    Ok(v)
}

fn array_from_variant(
    psa: *const SAFEARRAY,
    objects: &mut HandleTable<IDispatch>,
) -> Result<WireValue, ComError> {
    if psa.is_null() {
        return Ok(WireValue::Null);
    }
    let rank = unsafe { SafeArrayGetDim(psa) };
    let mut dims = Vec::with_capacity(rank as usize);
    for dim in 1..=rank {
        let (lower, upper) = unsafe {
            let lower = SafeArrayGetLBound(psa, dim)
                .map_err(|e| ComError::from_windows(&e, "SafeArrayGetLBound"))?;
            let upper = SafeArrayGetUBound(psa, dim)
                .map_err(|e| ComError::from_windows(&e, "SafeArrayGetUBound"))?;
            (lower, upper)
        };
        dims.push(Dimension::new(lower, (upper - lower + 1).max(0) as u32));
    }

    let total: usize = dims.iter().map(|d| d.count as usize).product();
    let mut elements = Vec::with_capacity(total);
    for offset in 0..total {
        let mut indices = indices_at(&dims, offset);
        indices.reverse();
        let mut element = OwnedVariant(VARIANT::default());
        unsafe {
            SafeArrayGetElement(
                psa,
                indices.as_ptr(),
                &mut element.0 as *mut VARIANT as *mut c_void,
            )
        }
        .map_err(|e| ComError::from_windows(&e, "SafeArrayGetElement"))?;
        elements.push(from_variant(&element.0, objects)?);
    }

    SafeArray::new(dims, elements)
        .map(WireValue::Array)
        .ok_or_else(|| ComError::new(status::E_FAIL, "inconsistent SAFEARRAY bounds"))
}
