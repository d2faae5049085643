//! Conversion between [`DynamicValue`] and the automation wire format.
//!
//! `to_wire` and `from_wire` are total: every dynamic value has a wire form,
//! and every wire value maps onto the nearest dynamic variant. Wire values are
//! owned Rust values, so whatever string or array storage a conversion
//! allocates is released when the value is dropped, on every exit path.
//!
//! Arrays are the one place where layout matters. A [`SafeArray`] stores its
//! elements with the first index varying fastest, while callers think of a
//! 2-D block as row-major. [`to_wire_grid`] and [`grid_from_wire`] do that
//! transposition and nothing else; in particular no padding is ever invented.

use chrono::{Duration, NaiveDate, NaiveDateTime, SubsecRound};
use dispatch_protocol::{Dimension, SafeArray, WireValue};
use smallvec::SmallVec;

use crate::error::MarshalError;
use crate::value::{DynamicValue, MAX_ARGS};

/// Marshaled call arguments.
pub type WireArgs = SmallVec<[WireValue; MAX_ARGS]>;

const MS_PER_DAY: i64 = 86_400_000;

/// Dates outside this many days from the epoch are not representable.
const MAX_OLE_DAYS: f64 = 2_958_466.0;

fn ole_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Convert a date to an OLE automation date.
///
/// The integer part counts days from 1899-12-30 and the fraction is the time
/// of day. Before the epoch the fraction is still a positive time of day,
/// so the value is `days - fraction` (`-1.25` is 1899-12-29 06:00).
/// Precision is one millisecond.
pub fn date_to_ole(date: NaiveDateTime) -> f64 {
    let ms = (date.round_subsecs(3) - ole_epoch()).num_milliseconds();
    let days = ms.div_euclid(MS_PER_DAY);
    let frac = ms.rem_euclid(MS_PER_DAY) as f64 / MS_PER_DAY as f64;
    if days >= 0 {
        days as f64 + frac
    } else {
        days as f64 - frac
    }
}

/// Inverse of [`date_to_ole`], rounded to the millisecond. `None` for values
/// that are not finite or fall outside the representable range.
pub fn ole_to_date(ole: f64) -> Option<NaiveDateTime> {
    if !ole.is_finite() || ole.abs() > MAX_OLE_DAYS {
        return None;
    }
    let days = ole.trunc();
    let time_ms = ((ole - days).abs() * MS_PER_DAY as f64).round() as i64;
    ole_epoch()
        .checked_add_signed(Duration::days(days as i64))?
        .checked_add_signed(Duration::milliseconds(time_ms))
}

/// Convert a dynamic value to its wire form.
pub fn to_wire(value: &DynamicValue) -> WireValue {
    match value {
        DynamicValue::Empty => WireValue::Empty,
        DynamicValue::Bool(b) => WireValue::Bool(*b),
        DynamicValue::Int(n) => WireValue::I4(*n),
        DynamicValue::Double(n) => WireValue::R8(*n),
        DynamicValue::String(s) => WireValue::Bstr(s.clone()),
        DynamicValue::Date(d) => WireValue::Date(date_to_ole(*d)),
        DynamicValue::List(items) => {
            WireValue::Array(SafeArray::vector(items.iter().map(to_wire).collect()))
        }
        DynamicValue::Handle(h) => WireValue::Dispatch(*h),
    }
}

/// Convert a wire value to a dynamic value.
pub fn from_wire(value: &WireValue) -> DynamicValue {
    match value {
        WireValue::Empty | WireValue::Null => DynamicValue::Empty,
        WireValue::Bool(b) => DynamicValue::Bool(*b),
        WireValue::UI1(n) => DynamicValue::Int(i32::from(*n)),
        WireValue::I2(n) => DynamicValue::Int(i32::from(*n)),
        WireValue::I4(n) => DynamicValue::Int(*n),
        WireValue::I8(n) => match i32::try_from(*n) {
            Ok(n) => DynamicValue::Int(n),
            Err(_) => DynamicValue::Double(*n as f64),
        },
        WireValue::R4(n) => DynamicValue::Double(f64::from(*n)),
        WireValue::R8(n) => DynamicValue::Double(*n),
        WireValue::Currency(n) => DynamicValue::Double(*n as f64 / 10_000.0),
        WireValue::Date(ole) => match ole_to_date(*ole) {
            Some(d) => DynamicValue::Date(d),
            None => DynamicValue::Double(*ole),
        },
        WireValue::Bstr(s) => DynamicValue::String(s.clone()),
        WireValue::Dispatch(h) => DynamicValue::Handle(*h),
        WireValue::Error(scode) => DynamicValue::Int(*scode),
        WireValue::Array(arr) => match grid_from_array(arr) {
            Some(grid) => DynamicValue::List(grid.cells),
            None => DynamicValue::List(arr.elements().iter().map(from_wire).collect()),
        },
    }
}

/// Marshal call arguments, enforcing the arity limit.
pub fn to_wire_args(args: &[DynamicValue]) -> Result<WireArgs, MarshalError> {
    if args.len() > MAX_ARGS {
        return Err(MarshalError::TooManyArgs {
            count: args.len(),
            max: MAX_ARGS,
        });
    }
    Ok(args.iter().map(to_wire).collect())
}

/// Build a 2-D array (`height` rows by `width` columns, lower bounds 1) from
/// row-major `items`.
///
/// `items` must fill the grid exactly; callers pad short input themselves.
/// Cells may not be lists.
pub fn to_wire_grid(
    items: &[DynamicValue],
    width: usize,
    height: usize,
) -> Result<WireValue, MarshalError> {
    if width == 0 || height == 0 {
        return Err(MarshalError::EmptyGrid { width, height });
    }
    let size_error = MarshalError::GridSize {
        len: items.len(),
        width,
        height,
    };
    match width.checked_mul(height) {
        Some(cells) if cells == items.len() => {}
        _ => return Err(size_error),
    }
    if let Some(index) = items
        .iter()
        .position(|v| matches!(v, DynamicValue::List(_)))
    {
        return Err(MarshalError::NestedList { index });
    }

    let mut elements = Vec::with_capacity(items.len());
    for col in 0..width {
        for row in 0..height {
            elements.push(to_wire(&items[row * width + col]));
        }
    }
    let dims = vec![
        Dimension::new(1, height as u32),
        Dimension::new(1, width as u32),
    ];
    SafeArray::new(dims, elements)
        .map(WireValue::Array)
        .ok_or(size_error)
}

/// A rectangular block of values in row-major order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Grid {
    pub width: usize,
    pub height: usize,
    pub cells: Vec<DynamicValue>,
}

impl Grid {
    pub fn get(&self, row: usize, col: usize) -> Option<&DynamicValue> {
        if col >= self.width {
            return None;
        }
        self.cells.get(row * self.width + col)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[DynamicValue]> {
        self.cells.chunks(self.width.max(1))
    }
}

/// Read a 2-D wire array back into a row-major [`Grid`]. `None` for anything
/// that is not a two-dimensional array.
pub fn grid_from_wire(value: &WireValue) -> Option<Grid> {
    match value {
        WireValue::Array(arr) => grid_from_array(arr),
        _ => None,
    }
}

fn grid_from_array(arr: &SafeArray) -> Option<Grid> {
    let [rows, cols] = arr.dims() else {
        return None;
    };
    let (height, width) = (rows.count as usize, cols.count as usize);
    let elements = arr.elements();
    let mut cells = Vec::with_capacity(elements.len());
    for row in 0..height {
        for col in 0..width {
            cells.push(from_wire(&elements[row + col * height]));
        }
    }
    Some(Grid {
        width,
        height,
        cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_protocol::Handle;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_milli_opt(h, min, s, ms)
            .unwrap()
    }

    #[test]
    fn test_ole_dates() {
        assert_eq!(date_to_ole(date(1899, 12, 30, 0, 0, 0, 0)), 0.0);
        assert_eq!(date_to_ole(date(1900, 1, 1, 12, 0, 0, 0)), 2.5);
        assert_eq!(date_to_ole(date(1899, 12, 29, 6, 0, 0, 0)), -1.25);
        assert_eq!(ole_to_date(-1.25), Some(date(1899, 12, 29, 6, 0, 0, 0)));
        assert_eq!(ole_to_date(45292.0), Some(date(2024, 1, 1, 0, 0, 0, 0)));
        assert_eq!(ole_to_date(f64::NAN), None);
        assert_eq!(ole_to_date(1e12), None);
    }

    #[test]
    fn test_sub_millisecond_dates_round_to_the_millisecond() {
        let fine = date(2024, 3, 5, 10, 0, 0, 0) + Duration::microseconds(1_600);
        let coarse = date(2024, 3, 5, 10, 0, 0, 2);
        assert_eq!(date_to_ole(fine), date_to_ole(coarse));
        assert_eq!(from_wire(&to_wire(&DynamicValue::Date(fine))), DynamicValue::Date(coarse));
        assert_eq!(DynamicValue::from(fine), DynamicValue::Date(coarse));
        assert_eq!(DynamicValue::date(fine), DynamicValue::Date(coarse));

        let late = date(2024, 3, 5, 23, 59, 59, 999) + Duration::microseconds(700);
        assert_eq!(
            from_wire(&to_wire(&DynamicValue::date(late))),
            DynamicValue::Date(date(2024, 3, 6, 0, 0, 0, 0))
        );
    }

    #[test]
    fn test_empty_is_no_value() {
        assert_eq!(to_wire(&DynamicValue::Empty), WireValue::Empty);
        assert_eq!(from_wire(&WireValue::Null), DynamicValue::Empty);
    }

    #[test]
    fn test_narrowing_from_wire() {
        assert_eq!(from_wire(&WireValue::I2(-3)), DynamicValue::Int(-3));
        assert_eq!(from_wire(&WireValue::I8(7)), DynamicValue::Int(7));
        assert_eq!(
            from_wire(&WireValue::I8(1 << 40)),
            DynamicValue::Double((1u64 << 40) as f64)
        );
        assert_eq!(from_wire(&WireValue::Currency(12_345)), DynamicValue::Double(1.2345));
        assert_eq!(from_wire(&WireValue::Error(-2146826246)), DynamicValue::Int(-2146826246));
        assert_eq!(from_wire(&WireValue::Date(f64::INFINITY)), DynamicValue::Double(f64::INFINITY));
    }

    #[test]
    fn test_grid_layout() {
        let items: Vec<DynamicValue> = (1..=6).map(DynamicValue::Int).collect();
        // 2 rows x 3 cols, row-major: [1 2 3][4 5 6]
        let wire = to_wire_grid(&items, 3, 2).unwrap();
        let WireValue::Array(arr) = &wire else {
            panic!("expected array, got {wire:?}");
        };
        assert_eq!(arr.dims(), &[Dimension::new(1, 2), Dimension::new(1, 3)]);
        assert_eq!(arr.get(&[1, 1]), Some(&WireValue::I4(1)));
        assert_eq!(arr.get(&[1, 3]), Some(&WireValue::I4(3)));
        assert_eq!(arr.get(&[2, 1]), Some(&WireValue::I4(4)));

        let grid = grid_from_wire(&wire).unwrap();
        assert_eq!((grid.width, grid.height), (3, 2));
        assert_eq!(grid.cells, items);
        assert_eq!(grid.get(1, 2), Some(&DynamicValue::Int(6)));
        assert_eq!(grid.rows().count(), 2);
        assert_eq!(from_wire(&wire), DynamicValue::List(items));
    }

    #[test]
    fn test_grid_rejections() {
        let items = vec![DynamicValue::Int(1); 5];
        assert_eq!(
            to_wire_grid(&items, 2, 2),
            Err(MarshalError::GridSize { len: 5, width: 2, height: 2 })
        );
        // no padding is invented for short input
        assert!(to_wire_grid(&items, 3, 2).is_err());
        assert_eq!(
            to_wire_grid(&[], 0, 4),
            Err(MarshalError::EmptyGrid { width: 0, height: 4 })
        );
        let nested = vec![DynamicValue::Int(1), DynamicValue::List(vec![])];
        assert_eq!(
            to_wire_grid(&nested, 2, 1),
            Err(MarshalError::NestedList { index: 1 })
        );
    }

    #[test]
    fn test_arg_limit() {
        let args = vec![DynamicValue::Bool(true); MAX_ARGS];
        assert_eq!(to_wire_args(&args).unwrap().len(), MAX_ARGS);
        let args = vec![DynamicValue::Bool(true); MAX_ARGS + 1];
        assert_eq!(
            to_wire_args(&args),
            Err(MarshalError::TooManyArgs { count: 9, max: 8 })
        );
    }

    fn arb_date() -> impl Strategy<Value = NaiveDateTime> {
        (-600_000i64..2_900_000, 0i64..MS_PER_DAY * 1000)
            .prop_map(|(days, us)| ole_epoch() + Duration::days(days) + Duration::microseconds(us))
    }

    fn arb_value() -> impl Strategy<Value = DynamicValue> {
        let leaf = prop_oneof![
            Just(DynamicValue::Empty),
            any::<bool>().prop_map(DynamicValue::Bool),
            any::<i32>().prop_map(DynamicValue::Int),
            any::<f64>()
                .prop_filter("NaN never compares equal", |f| !f.is_nan())
                .prop_map(DynamicValue::Double),
            ".*".prop_map(DynamicValue::String),
            arb_date().prop_map(DynamicValue::date),
            any::<u64>().prop_map(|h| DynamicValue::Handle(Handle(h))),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop::collection::vec(inner, 0..6).prop_map(DynamicValue::List)
        })
    }

    proptest! {
        #[test]
        fn prop_roundtrip(v in arb_value()) {
            prop_assert_eq!(from_wire(&to_wire(&v)), v);
        }

        #[test]
        fn prop_raw_dates_come_back_rounded(d in arb_date()) {
            prop_assert_eq!(from_wire(&to_wire(&DynamicValue::Date(d))), DynamicValue::date(d));
        }

        #[test]
        fn prop_grid_succeeds_only_when_exact(
            len in 0usize..20,
            width in 0usize..6,
            height in 0usize..6,
        ) {
            let items: Vec<DynamicValue> = (0..len as i32).map(DynamicValue::Int).collect();
            let result = to_wire_grid(&items, width, height);
            if width > 0 && height > 0 && width * height == len {
                let wire = result.unwrap();
                prop_assert_eq!(grid_from_wire(&wire).unwrap().cells, items);
            } else {
                prop_assert!(result.is_err());
            }
        }
    }
}
