//! The automation variant and its array form.

use serde::{Deserialize, Serialize};

use crate::Handle;

/// A value as the automation ABI carries it: a type tag plus payload.
///
/// The tags mirror the variant types a dispatch server produces. Values are
/// owned; dropping one releases any string or array storage it holds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "vt", content = "val")]
pub enum WireValue {
    /// No value at all (`VT_EMPTY`).
    #[default]
    Empty,
    /// Explicit SQL-style null (`VT_NULL`).
    Null,
    Bool(bool),
    UI1(u8),
    I2(i16),
    I4(i32),
    I8(i64),
    R4(f32),
    R8(f64),
    /// Fixed-point currency, scaled by 10 000.
    Currency(i64),
    /// OLE automation date: days since 1899-12-30, time as the fraction.
    Date(f64),
    Bstr(String),
    Dispatch(Handle),
    /// Error code payload (`VT_ERROR`), e.g. a spreadsheet `#N/A`.
    Error(i32),
    Array(SafeArray),
}

impl WireValue {
    /// Short tag name, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            WireValue::Empty => "EMPTY",
            WireValue::Null => "NULL",
            WireValue::Bool(_) => "BOOL",
            WireValue::UI1(_) => "UI1",
            WireValue::I2(_) => "I2",
            WireValue::I4(_) => "I4",
            WireValue::I8(_) => "I8",
            WireValue::R4(_) => "R4",
            WireValue::R8(_) => "R8",
            WireValue::Currency(_) => "CY",
            WireValue::Date(_) => "DATE",
            WireValue::Bstr(_) => "BSTR",
            WireValue::Dispatch(_) => "DISPATCH",
            WireValue::Error(_) => "ERROR",
            WireValue::Array(_) => "ARRAY",
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, WireValue::Empty | WireValue::Null)
    }

    /// The object handle, if this is a non-null dispatch value.
    pub fn as_dispatch(&self) -> Option<Handle> {
        match self {
            WireValue::Dispatch(h) => h.valid(),
            _ => None,
        }
    }
}

/// One dimension of a [`SafeArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub lower: i32,
    pub count: u32,
}

impl Dimension {
    pub fn new(lower: i32, count: u32) -> Self {
        Self { lower, count }
    }
}

/// A multi-dimensional array of variants.
///
/// Elements are kept in ABI storage order: the first index varies fastest.
/// For a spreadsheet range (`dims = [rows, cols]`) that means column-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSafeArray")]
pub struct SafeArray {
    dims: Vec<Dimension>,
    elements: Vec<WireValue>,
}

#[derive(Deserialize)]
struct RawSafeArray {
    dims: Vec<Dimension>,
    elements: Vec<WireValue>,
}

impl TryFrom<RawSafeArray> for SafeArray {
    type Error = String;

    fn try_from(raw: RawSafeArray) -> Result<Self, Self::Error> {
        SafeArray::new(raw.dims, raw.elements)
            .ok_or_else(|| "array element count does not match its dimensions".to_string())
    }
}

impl SafeArray {
    /// Build an array, checking that `elements` exactly fills `dims`.
    pub fn new(dims: Vec<Dimension>, elements: Vec<WireValue>) -> Option<Self> {
        if dims.is_empty() {
            return None;
        }
        let total = dims
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(d.count as usize))?;
        (total == elements.len()).then_some(Self { dims, elements })
    }

    /// A one-dimensional, zero-based array.
    pub fn vector(elements: Vec<WireValue>) -> Self {
        Self {
            dims: vec![Dimension::new(0, elements.len() as u32)],
            elements,
        }
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements in storage order.
    pub fn elements(&self) -> &[WireValue] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<WireValue> {
        self.elements
    }

    /// Storage offset of an element addressed by ABI indices (bounds included).
    pub fn offset(&self, indices: &[i32]) -> Option<usize> {
        if indices.len() != self.dims.len() {
            return None;
        }
        let mut offset = 0usize;
        let mut stride = 1usize;
        for (index, dim) in indices.iter().zip(&self.dims) {
            let rel = index.checked_sub(dim.lower)?;
            if rel < 0 || rel as u32 >= dim.count {
                return None;
            }
            offset += rel as usize * stride;
            stride *= dim.count as usize;
        }
        Some(offset)
    }

    pub fn get(&self, indices: &[i32]) -> Option<&WireValue> {
        self.offset(indices).map(|i| &self.elements[i])
    }
}
