//! Typed value model
//!
//! Every value in the table is a [`TypedValue`]: a tag plus a payload. On the
//! wire the tag travels as [`ValueType`] next to the encoded bytes. Scalars use
//! fixed big-endian layouts, lists and structured records are protobuf
//! messages. Decoding is strict: the payload must match the tag exactly and
//! nothing is coerced between kinds.

pub(crate) mod json_float;
mod table_value;

pub use table_value::*;


use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use prost::Message;
use serde_json::json;
use serde_json::Value as Json;

use self::json_float::JsonFloat;
use crate::errors::ValueError;
use crate::proto::BezierCurve;
use crate::proto::BezierCurves;
use crate::proto::BoolList;
use crate::proto::BytesList;
use crate::proto::Coordinate;
use crate::proto::CoordinateList;
use crate::proto::DoubleList;
use crate::proto::FloatList;
use crate::proto::Int32List;
use crate::proto::Int64List;
use crate::proto::Pose2d;
use crate::proto::Pose3d;
use crate::proto::StringList;
use crate::proto::ValueType;

#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    /// Opaque payload whose type the sender did not declare
    Unknown(Vec<u8>),
    StringList(Vec<String>),
    Int32List(Vec<i32>),
    Int64List(Vec<i64>),
    FloatList(Vec<f32>),
    DoubleList(Vec<f64>),
    BoolList(Vec<bool>),
    BytesList(Vec<Vec<u8>>),
    Pose2d(Pose2d),
    Pose3d(Pose3d),
    Coordinates(Vec<Coordinate>),
    BezierCurves(Vec<BezierCurve>),
}

impl TypedValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            TypedValue::String(_) => ValueType::String,
            TypedValue::Int32(_) => ValueType::Int32,
            TypedValue::Int64(_) => ValueType::Int64,
            TypedValue::Double(_) => ValueType::Double,
            TypedValue::Bool(_) => ValueType::Bool,
            TypedValue::Bytes(_) => ValueType::Bytes,
            TypedValue::Unknown(_) => ValueType::Unknown,
            TypedValue::StringList(_) => ValueType::StringList,
            TypedValue::Int32List(_) => ValueType::Int32List,
            TypedValue::Int64List(_) => ValueType::Int64List,
            TypedValue::FloatList(_) => ValueType::FloatList,
            TypedValue::DoubleList(_) => ValueType::DoubleList,
            TypedValue::BoolList(_) => ValueType::BoolList,
            TypedValue::BytesList(_) => ValueType::BytesList,
            TypedValue::Pose2d(_) => ValueType::Pose2d,
            TypedValue::Pose3d(_) => ValueType::Pose3d,
            TypedValue::Coordinates(_) => ValueType::Coordinates,
            TypedValue::BezierCurves(_) => ValueType::BezierCurves,
        }
    }

    /// Payload bytes for the wire, without the tag.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            TypedValue::String(s) => s.as_bytes().to_vec(),
            TypedValue::Int32(v) => v.to_be_bytes().to_vec(),
            TypedValue::Int64(v) => v.to_be_bytes().to_vec(),
            TypedValue::Double(v) => v.to_be_bytes().to_vec(),
            TypedValue::Bool(v) => vec![u8::from(*v)],
            TypedValue::Bytes(b) | TypedValue::Unknown(b) => b.clone(),
            TypedValue::StringList(values) => StringList {
                values: values.clone(),
            }
            .encode_to_vec(),
            TypedValue::Int32List(values) => Int32List {
                values: values.clone(),
            }
            .encode_to_vec(),
            TypedValue::Int64List(values) => Int64List {
                values: values.clone(),
            }
            .encode_to_vec(),
            TypedValue::FloatList(values) => FloatList {
                values: values.clone(),
            }
            .encode_to_vec(),
            TypedValue::DoubleList(values) => DoubleList {
                values: values.clone(),
            }
            .encode_to_vec(),
            TypedValue::BoolList(values) => BoolList {
                values: values.clone(),
            }
            .encode_to_vec(),
            TypedValue::BytesList(values) => BytesList {
                values: values.clone(),
            }
            .encode_to_vec(),
            TypedValue::Pose2d(pose) => pose.encode_to_vec(),
            TypedValue::Pose3d(pose) => pose.encode_to_vec(),
            TypedValue::Coordinates(coordinates) => CoordinateList {
                coordinates: coordinates.clone(),
            }
            .encode_to_vec(),
            TypedValue::BezierCurves(curves) => BezierCurves {
                curves: curves.clone(),
            }
            .encode_to_vec(),
        }
    }

    /// Rebuild a value from its tag and payload bytes.
    pub fn decode(
        value_type: ValueType,
        bytes: &[u8],
    ) -> Result<Self, ValueError> {
        let value = match value_type {
            ValueType::Unknown => TypedValue::Unknown(bytes.to_vec()),
            ValueType::Bytes => TypedValue::Bytes(bytes.to_vec()),
            ValueType::String => {
                let s = std::str::from_utf8(bytes).map_err(|e| malformed(value_type, e))?;
                TypedValue::String(s.to_string())
            }
            ValueType::Int32 => TypedValue::Int32(i32::from_be_bytes(fixed(value_type, bytes)?)),
            ValueType::Int64 => TypedValue::Int64(i64::from_be_bytes(fixed(value_type, bytes)?)),
            ValueType::Double => TypedValue::Double(f64::from_be_bytes(fixed(value_type, bytes)?)),
            ValueType::Bool => {
                let [byte] = fixed::<1>(value_type, bytes)?;
                match byte {
                    0 => TypedValue::Bool(false),
                    1 => TypedValue::Bool(true),
                    other => {
                        return Err(ValueError::Malformed {
                            value_type,
                            reason: format!("bool byte must be 0 or 1, got {other:#04x}"),
                        })
                    }
                }
            }
            ValueType::StringList => TypedValue::StringList(proto::<StringList>(value_type, bytes)?.values),
            ValueType::Int32List => TypedValue::Int32List(proto::<Int32List>(value_type, bytes)?.values),
            ValueType::Int64List => TypedValue::Int64List(proto::<Int64List>(value_type, bytes)?.values),
            ValueType::FloatList => TypedValue::FloatList(proto::<FloatList>(value_type, bytes)?.values),
            ValueType::DoubleList => TypedValue::DoubleList(proto::<DoubleList>(value_type, bytes)?.values),
            ValueType::BoolList => TypedValue::BoolList(proto::<BoolList>(value_type, bytes)?.values),
            ValueType::BytesList => TypedValue::BytesList(proto::<BytesList>(value_type, bytes)?.values),
            ValueType::Pose2d => TypedValue::Pose2d(proto::<Pose2d>(value_type, bytes)?),
            ValueType::Pose3d => TypedValue::Pose3d(proto::<Pose3d>(value_type, bytes)?),
            ValueType::Coordinates => {
                TypedValue::Coordinates(proto::<CoordinateList>(value_type, bytes)?.coordinates)
            }
            ValueType::BezierCurves => TypedValue::BezierCurves(proto::<BezierCurves>(value_type, bytes)?.curves),
        };
        Ok(value)
    }

    /// JSON node of the form `{"type": "DOUBLE", "value": 3.14}`.
    pub fn to_json(&self) -> Json {
        let value = match self {
            TypedValue::String(s) => json!(s),
            TypedValue::Int32(v) => json!(v),
            TypedValue::Int64(v) => json!(v),
            TypedValue::Double(v) => json_float::to_json(*v),
            TypedValue::Bool(v) => json!(v),
            TypedValue::Bytes(b) | TypedValue::Unknown(b) => json!(STANDARD.encode(b)),
            TypedValue::StringList(values) => json!(values),
            TypedValue::Int32List(values) => json!(values),
            TypedValue::Int64List(values) => json!(values),
            TypedValue::FloatList(values) => Json::Array(values.iter().map(|v| json_float::to_json(*v)).collect()),
            TypedValue::DoubleList(values) => Json::Array(values.iter().map(|v| json_float::to_json(*v)).collect()),
            TypedValue::BoolList(values) => json!(values),
            TypedValue::BytesList(values) => {
                Json::Array(values.iter().map(|b| json!(STANDARD.encode(b))).collect())
            }
            TypedValue::Pose2d(pose) => json!(pose),
            TypedValue::Pose3d(pose) => json!(pose),
            TypedValue::Coordinates(coordinates) => json!(coordinates),
            TypedValue::BezierCurves(curves) => json!(curves),
        };
        json!({ "type": self.value_type().as_str_name(), "value": value })
    }

    /// Inverse of [`TypedValue::to_json`].
    pub fn from_json(node: &Json) -> Result<Self, ValueError> {
        let tag = node.get("type").and_then(Json::as_str).ok_or_else(|| ValueError::Json {
            value_type: ValueType::Unknown,
            reason: "missing \"type\"".to_string(),
        })?;
        let value_type = ValueType::from_str_name(tag).ok_or_else(|| ValueError::Json {
            value_type: ValueType::Unknown,
            reason: format!("unknown type name {tag}"),
        })?;
        let raw = node.get("value").cloned().unwrap_or(Json::Null);

        let value = match value_type {
            ValueType::String => TypedValue::String(from_json(value_type, raw)?),
            ValueType::Int32 => TypedValue::Int32(from_json(value_type, raw)?),
            ValueType::Int64 => TypedValue::Int64(from_json(value_type, raw)?),
            ValueType::Double => TypedValue::Double(from_json::<JsonFloat>(value_type, raw)?.0),
            ValueType::Bool => TypedValue::Bool(from_json(value_type, raw)?),
            ValueType::Bytes => TypedValue::Bytes(base64_field(value_type, raw)?),
            ValueType::Unknown => TypedValue::Unknown(base64_field(value_type, raw)?),
            ValueType::StringList => TypedValue::StringList(from_json(value_type, raw)?),
            ValueType::Int32List => TypedValue::Int32List(from_json(value_type, raw)?),
            ValueType::Int64List => TypedValue::Int64List(from_json(value_type, raw)?),
            ValueType::FloatList => {
                let values: Vec<JsonFloat> = from_json(value_type, raw)?;
                TypedValue::FloatList(values.into_iter().map(|v| v.0 as f32).collect())
            }
            ValueType::DoubleList => {
                let values: Vec<JsonFloat> = from_json(value_type, raw)?;
                TypedValue::DoubleList(values.into_iter().map(|v| v.0).collect())
            }
            ValueType::BoolList => TypedValue::BoolList(from_json(value_type, raw)?),
            ValueType::BytesList => {
                let encoded: Vec<String> = from_json(value_type, raw)?;
                let decoded = encoded
                    .iter()
                    .map(|s| STANDARD.decode(s).map_err(|e| json_error(value_type, e)))
                    .collect::<Result<Vec<_>, _>>()?;
                TypedValue::BytesList(decoded)
            }
            ValueType::Pose2d => TypedValue::Pose2d(from_json(value_type, raw)?),
            ValueType::Pose3d => TypedValue::Pose3d(from_json(value_type, raw)?),
            ValueType::Coordinates => TypedValue::Coordinates(from_json(value_type, raw)?),
            ValueType::BezierCurves => TypedValue::BezierCurves(from_json(value_type, raw)?),
        };
        Ok(value)
    }
}

fn malformed(
    value_type: ValueType,
    reason: impl std::fmt::Display,
) -> ValueError {
    ValueError::Malformed {
        value_type,
        reason: reason.to_string(),
    }
}

fn json_error(
    value_type: ValueType,
    reason: impl std::fmt::Display,
) -> ValueError {
    ValueError::Json {
        value_type,
        reason: reason.to_string(),
    }
}

fn fixed<const N: usize>(
    value_type: ValueType,
    bytes: &[u8],
) -> Result<[u8; N], ValueError> {
    bytes.try_into().map_err(|_| ValueError::InvalidLength {
        value_type,
        expected: N,
        actual: bytes.len(),
    })
}

fn proto<M: Message + Default>(
    value_type: ValueType,
    bytes: &[u8],
) -> Result<M, ValueError> {
    M::decode(bytes).map_err(|e| malformed(value_type, e))
}

fn from_json<T: serde::de::DeserializeOwned>(
    value_type: ValueType,
    raw: Json,
) -> Result<T, ValueError> {
    serde_json::from_value(raw).map_err(|e| json_error(value_type, e))
}

fn base64_field(
    value_type: ValueType,
    raw: Json,
) -> Result<Vec<u8>, ValueError> {
    let encoded: String = from_json(value_type, raw)?;
    STANDARD.decode(encoded).map_err(|e| json_error(value_type, e))
}
