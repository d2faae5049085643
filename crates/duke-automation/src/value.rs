//! The dynamic value type used for every property, argument, and result that
//! crosses the proxy boundary.

use std::fmt;

use chrono::{NaiveDateTime, SubsecRound};
use dispatch_protocol::Handle;
use smallvec::SmallVec;

/// Largest number of positional arguments a single call may carry.
pub const MAX_ARGS: usize = 8;

/// Positional call arguments.
pub type Args = SmallVec<[DynamicValue; MAX_ARGS]>;

/// A dynamically typed value.
///
/// This is a closed set: anything the server returns outside of it is
/// mapped onto the nearest variant by [`from_wire`](crate::marshal::from_wire).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DynamicValue {
    #[default]
    Empty,
    Bool(bool),
    Int(i32),
    Double(f64),
    String(String),
    /// Date and time. The wire carries whole milliseconds, so anything finer
    /// is rounded away on the way out; [`DynamicValue::date`] and `From`
    /// apply the same rounding up front.
    Date(NaiveDateTime),
    List(Vec<DynamicValue>),
    Handle(Handle),
}

impl DynamicValue {
    /// A date rounded to the millisecond, equal to what a round trip
    /// through the server gives back.
    pub fn date(d: NaiveDateTime) -> Self {
        DynamicValue::Date(d.round_subsecs(3))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        DynamicValue::String(s.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, DynamicValue::Empty)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DynamicValue::Empty => "empty",
            DynamicValue::Bool(_) => "bool",
            DynamicValue::Int(_) => "int",
            DynamicValue::Double(_) => "double",
            DynamicValue::String(_) => "string",
            DynamicValue::Date(_) => "date",
            DynamicValue::List(_) => "list",
            DynamicValue::Handle(_) => "handle",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DynamicValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            DynamicValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DynamicValue::Double(n) => Some(*n),
            DynamicValue::Int(n) => Some(f64::from(*n)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynamicValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            DynamicValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DynamicValue]> {
        match self {
            DynamicValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// The object handle, if this is a non-null handle value.
    pub fn as_handle(&self) -> Option<Handle> {
        match self {
            DynamicValue::Handle(h) => h.valid(),
            _ => None,
        }
    }

    /// Lenient truthiness: non-zero numbers and `"true"`/`"1"` strings.
    pub fn to_bool(&self) -> bool {
        match self {
            DynamicValue::Bool(b) => *b,
            DynamicValue::Int(n) => *n != 0,
            DynamicValue::Double(n) => *n != 0.0,
            DynamicValue::String(s) => {
                let s = s.trim();
                s.eq_ignore_ascii_case("true") || s == "1"
            }
            DynamicValue::Handle(h) => h.is_valid(),
            _ => false,
        }
    }

    /// Lenient integer conversion; doubles are truncated, strings parsed.
    pub fn to_int(&self) -> Option<i64> {
        match self {
            DynamicValue::Int(n) => Some(i64::from(*n)),
            DynamicValue::Bool(b) => Some(i64::from(*b)),
            DynamicValue::Double(n) if n.is_finite() => Some(n.trunc() as i64),
            DynamicValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<bool> for DynamicValue {
    fn from(b: bool) -> Self {
        DynamicValue::Bool(b)
    }
}

impl From<i32> for DynamicValue {
    fn from(n: i32) -> Self {
        DynamicValue::Int(n)
    }
}

impl From<f64> for DynamicValue {
    fn from(n: f64) -> Self {
        DynamicValue::Double(n)
    }
}

impl From<&str> for DynamicValue {
    fn from(s: &str) -> Self {
        DynamicValue::String(s.to_string())
    }
}

impl From<String> for DynamicValue {
    fn from(s: String) -> Self {
        DynamicValue::String(s)
    }
}

impl From<NaiveDateTime> for DynamicValue {
    fn from(d: NaiveDateTime) -> Self {
        DynamicValue::date(d)
    }
}

impl From<Handle> for DynamicValue {
    fn from(h: Handle) -> Self {
        DynamicValue::Handle(h)
    }
}

impl<T: Into<DynamicValue>> From<Vec<T>> for DynamicValue {
    fn from(items: Vec<T>) -> Self {
        DynamicValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<DynamicValue>> From<Option<T>> for DynamicValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(DynamicValue::Empty, Into::into)
    }
}

impl fmt::Display for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynamicValue::Empty => write!(f, "<empty>"),
            DynamicValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            DynamicValue::Int(n) => write!(f, "{n}"),
            DynamicValue::Double(n) => write!(f, "{n}"),
            DynamicValue::String(s) => write!(f, "{s}"),
            DynamicValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S%.3f")),
            DynamicValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            DynamicValue::Handle(h) => write!(f, "{h}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_conversions() {
        assert!(DynamicValue::from("TRUE").to_bool());
        assert!(DynamicValue::Int(-1).to_bool());
        assert!(!DynamicValue::Empty.to_bool());
        assert_eq!(DynamicValue::Double(3.9).to_int(), Some(3));
        assert_eq!(DynamicValue::from(" 42 ").to_int(), Some(42));
        assert_eq!(DynamicValue::from("x").to_int(), None);
    }

    #[test]
    fn test_null_handle_is_not_a_handle() {
        assert_eq!(DynamicValue::Handle(Handle::NONE).as_handle(), None);
        assert_eq!(DynamicValue::Handle(Handle(5)).as_handle(), Some(Handle(5)));
    }

    #[test]
    fn test_display_list() {
        let v = DynamicValue::from(vec![
            DynamicValue::Int(1),
            DynamicValue::from("a"),
            DynamicValue::Bool(false),
        ]);
        assert_eq!(v.to_string(), "[1, a, FALSE]");
    }
}
