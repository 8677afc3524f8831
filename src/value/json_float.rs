//! JSON form of floating point values.
//!
//! JSON numbers cannot carry NaN or infinities, so those are written as the
//! strings `"NaN"`, `"Infinity"` and `"-Infinity"` and read back from them.
//! Usable as `#[serde(with = "crate::value::json_float")]` on `f64` fields.

use serde::de::Error as _;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json::json;
use serde_json::Value as Json;

const NAN: &str = "NaN";
const INFINITY: &str = "Infinity";
const NEG_INFINITY: &str = "-Infinity";

fn non_finite_name(value: f64) -> &'static str {
    if value.is_nan() {
        NAN
    } else if value.is_sign_positive() {
        INFINITY
    } else {
        NEG_INFINITY
    }
}

fn parse_non_finite(name: &str) -> Option<f64> {
    match name {
        NAN => Some(f64::NAN),
        INFINITY => Some(f64::INFINITY),
        NEG_INFINITY => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

pub fn serialize<S: Serializer>(
    value: &f64,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        serializer.serialize_str(non_finite_name(*value))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Number(f64),
    Name(String),
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Repr::deserialize(deserializer)? {
        Repr::Number(value) => Ok(value),
        Repr::Name(name) => parse_non_finite(&name).ok_or_else(|| D::Error::custom(format!("not a number: {name}"))),
    }
}

/// One list element, accepted in either form.
pub(crate) struct JsonFloat(pub(crate) f64);

impl<'de> Deserialize<'de> for JsonFloat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        self::deserialize(deserializer).map(JsonFloat)
    }
}

/// Finite values keep their native JSON number form.
pub(crate) fn to_json<T>(value: T) -> Json
where
    T: Into<f64> + Serialize + Copy,
{
    let wide: f64 = value.into();
    if wide.is_finite() {
        json!(value)
    } else {
        Json::String(non_finite_name(wide).to_string())
    }
}
