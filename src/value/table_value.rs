use crate::proto::BezierCurve;
use crate::proto::Coordinate;
use crate::proto::Pose2d;
use crate::proto::Pose3d;
use crate::proto::ValueType;
use crate::value::TypedValue;

/// Rust types that map one-to-one onto a [`TypedValue`] variant.
///
/// Backs the single generic `get::<T>` / `put` entry points of the client.
pub trait TableValue: Sized {
    const TYPE: ValueType;

    fn into_value(self) -> TypedValue;

    /// `None` when `value` holds a different variant.
    fn from_value(value: TypedValue) -> Option<Self>;
}

macro_rules! table_value {
    ($ty:ty, $variant:ident) => {
        impl TableValue for $ty {
            const TYPE: ValueType = ValueType::$variant;

            fn into_value(self) -> TypedValue {
                TypedValue::$variant(self)
            }

            fn from_value(value: TypedValue) -> Option<Self> {
                match value {
                    TypedValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl From<$ty> for TypedValue {
            fn from(value: $ty) -> Self {
                TypedValue::$variant(value)
            }
        }
    };
}

table_value!(String, String);
table_value!(i32, Int32);
table_value!(i64, Int64);
table_value!(f64, Double);
table_value!(bool, Bool);
table_value!(Vec<u8>, Bytes);
table_value!(Vec<String>, StringList);
table_value!(Vec<i32>, Int32List);
table_value!(Vec<i64>, Int64List);
table_value!(Vec<f32>, FloatList);
table_value!(Vec<f64>, DoubleList);
table_value!(Vec<bool>, BoolList);
table_value!(Vec<Vec<u8>>, BytesList);
table_value!(Pose2d, Pose2d);
table_value!(Pose3d, Pose3d);
table_value!(Vec<Coordinate>, Coordinates);
table_value!(Vec<BezierCurve>, BezierCurves);

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        TypedValue::String(value.to_string())
    }
}
