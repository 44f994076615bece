//! Numeric kinds supported by scalar and histogram components.
//!
//! Scalar and histogram tablets are generic over [`Numeric`], a sealed trait
//! implemented for `i32`, `i64`, `f32` and `f64`. Persisted values carry
//! their width as a [`NumericValue`] so a reader can tell an `f32` record from
//! an `f64` one without consulting the writer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The width and representation of a numeric record value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericKind {
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
}

impl fmt::Display for NumericKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A numeric value tagged with its kind, as persisted in a record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NumericValue {
    /// 32-bit signed integer value.
    I32(i32),
    /// 64-bit signed integer value.
    I64(i64),
    /// 32-bit floating point value.
    F32(f32),
    /// 64-bit floating point value.
    F64(f64),
}

impl NumericValue {
    /// Returns the kind of this value.
    pub fn kind(&self) -> NumericKind {
        match self {
            Self::I32(_) => NumericKind::I32,
            Self::I64(_) => NumericKind::I64,
            Self::F32(_) => NumericKind::F32,
            Self::F64(_) => NumericKind::F64,
        }
    }

    /// Returns the value widened to `f64`.
    #[allow(clippy::cast_precision_loss)] // i64 beyond 2^53 is displayed approximately
    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::I32(v) => f64::from(v),
            Self::I64(v) => v as f64,
            Self::F32(v) => f64::from(v),
            Self::F64(v) => v,
        }
    }
}

impl fmt::Display for NumericValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A numeric type that scalar and histogram components can record.
///
/// This trait is sealed; it is implemented for exactly `i32`, `i64`, `f32`
/// and `f64`.
pub trait Numeric:
    sealed::Sealed + Copy + PartialOrd + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// The kind tag persisted alongside values of this type.
    const KIND: NumericKind;

    /// Widens the value to `f64` for arithmetic.
    fn to_f64(self) -> f64;

    /// Narrows an `f64` back into this type.
    ///
    /// Integer types truncate toward zero and saturate at their bounds.
    fn from_f64(value: f64) -> Self;

    /// Wraps the value with its kind tag.
    fn into_value(self) -> NumericValue;

    /// Unwraps a tagged value, returning `None` if the kind differs.
    fn from_value(value: NumericValue) -> Option<Self>;

    /// Whether the value is finite. Always true for integers.
    fn is_finite(self) -> bool;
}

macro_rules! impl_numeric_int {
    ($ty:ty, $kind:ident) => {
        impl sealed::Sealed for $ty {}

        impl Numeric for $ty {
            const KIND: NumericKind = NumericKind::$kind;

            #[allow(clippy::cast_precision_loss)]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[allow(clippy::cast_possible_truncation)]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn into_value(self) -> NumericValue {
                NumericValue::$kind(self)
            }

            fn from_value(value: NumericValue) -> Option<Self> {
                match value {
                    NumericValue::$kind(v) => Some(v),
                    _ => None,
                }
            }

            fn is_finite(self) -> bool {
                true
            }
        }
    };
}

macro_rules! impl_numeric_float {
    ($ty:ty, $kind:ident) => {
        impl sealed::Sealed for $ty {}

        impl Numeric for $ty {
            const KIND: NumericKind = NumericKind::$kind;

            fn to_f64(self) -> f64 {
                f64::from(self)
            }

            #[allow(clippy::cast_possible_truncation)]
            fn from_f64(value: f64) -> Self {
                value as $ty
            }

            fn into_value(self) -> NumericValue {
                NumericValue::$kind(self)
            }

            fn from_value(value: NumericValue) -> Option<Self> {
                match value {
                    NumericValue::$kind(v) => Some(v),
                    _ => None,
                }
            }

            fn is_finite(self) -> bool {
                <$ty>::is_finite(self)
            }
        }
    };
}

impl_numeric_int!(i32, I32);
impl_numeric_int!(i64, I64);
impl_numeric_float!(f32, F32);
impl_numeric_float!(f64, F64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_round_trip_keeps_width() {
        let v = 0.5f32.into_value();
        assert_eq!(v.kind(), NumericKind::F32);
        assert_eq!(f32::from_value(v), Some(0.5));
        assert_eq!(f64::from_value(v), None);

        let v = 7i64.into_value();
        assert_eq!(v.kind(), NumericKind::I64);
        assert_eq!(i64::from_value(v), Some(7));
        assert_eq!(i32::from_value(v), None);
    }

    #[test]
    fn test_from_f64_truncates_and_saturates() {
        assert_eq!(i32::from_f64(3.9), 3);
        assert_eq!(i32::from_f64(-3.9), -3);
        assert_eq!(i32::from_f64(1e12), i32::MAX);
        assert_eq!(f32::from_f64(0.25), 0.25);
    }

    #[test]
    fn test_finiteness() {
        assert!(1i32.is_finite());
        assert!(!f64::NAN.is_finite());
        assert!(!Numeric::is_finite(f32::INFINITY));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(NumericKind::I32.to_string(), "i32");
        assert_eq!(NumericKind::F64.to_string(), "f64");
        assert_eq!(NumericValue::I64(42).to_string(), "42");
    }
}
