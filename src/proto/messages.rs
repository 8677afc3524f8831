// Wire messages of the treebus protocol.
//
// Declared with prost derives directly so the crate builds without protoc.
// Field tags are part of the wire format and must never be renumbered.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// Frame sent by clients on every channel and returned on the request channel.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableMessage {
    #[prost(string, optional, tag = "1")]
    pub key: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(enumeration = "Command", tag = "2")]
    pub command: i32,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub value: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
    #[prost(enumeration = "ValueType", tag = "4")]
    pub r#type: i32,
    /// Session token carried by REGISTRY and INFORMATION answers
    #[prost(bytes = "vec", optional, tag = "5")]
    pub id: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
    /// Selects the LOG category on subscription commands
    #[prost(enumeration = "Category", optional, tag = "6")]
    pub category: ::core::option::Option<i32>,
    #[prost(message, repeated, tag = "7")]
    pub batch: ::prost::alloc::vec::Vec<TableMessage>,
    #[prost(enumeration = "ReplyStatus", tag = "8")]
    pub status: i32,
}

/// Event fanned out on the broadcast channel.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableUpdate {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(enumeration = "Category", tag = "2")]
    pub category: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub value: ::prost::alloc::vec::Vec<u8>,
    #[prost(enumeration = "ValueType", tag = "4")]
    pub r#type: i32,
}

/// One node of a full-tree snapshot.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableNode {
    #[prost(map = "string, message", tag = "1")]
    pub children: HashMap<::prost::alloc::string::String, TableNode>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub value: ::core::option::Option<::prost::alloc::vec::Vec<u8>>,
    #[prost(enumeration = "ValueType", tag = "3")]
    pub r#type: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerInfo {
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub status: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "3")]
    pub session_token: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "4")]
    pub uptime_ms: u64,
    #[prost(uint64, tag = "5")]
    pub value_count: u64,
    #[prost(uint32, tag = "6")]
    pub subscriber_count: u32,
    #[prost(bool, tag = "7")]
    pub debug: bool,
    #[prost(uint64, tag = "8")]
    pub push_messages: u64,
    #[prost(uint64, tag = "9")]
    pub request_messages: u64,
    #[prost(uint64, tag = "10")]
    pub broadcast_messages: u64,
    #[prost(message, repeated, tag = "11")]
    pub clients: ::prost::alloc::vec::Vec<ClientInfo>,
    #[prost(uint64, tag = "12")]
    pub session_rotations: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientInfo {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub version: ::prost::alloc::string::String,
    #[prost(uint32, tag = "3")]
    pub buffer_len: u32,
    #[prost(uint32, tag = "4")]
    pub buffer_capacity: u32,
    #[prost(uint64, tag = "5")]
    pub overflow: u64,
    #[prost(string, repeated, tag = "6")]
    pub subscriptions: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogRecord {
    #[prost(enumeration = "LogLevel", tag = "1")]
    pub level: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub timestamp_ms: u64,
}

// List payloads

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StringList {
    #[prost(string, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Int32List {
    #[prost(int32, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Int64List {
    #[prost(int64, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FloatList {
    #[prost(float, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<f32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DoubleList {
    #[prost(double, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BoolList {
    #[prost(bool, repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BytesList {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub values: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

// Structured records

#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, ::prost::Message)]
pub struct Pose2d {
    #[prost(double, tag = "1")]
    #[serde(with = "crate::value::json_float")]
    pub x: f64,
    #[prost(double, tag = "2")]
    #[serde(with = "crate::value::json_float")]
    pub y: f64,
    #[prost(double, tag = "3")]
    #[serde(with = "crate::value::json_float")]
    pub rotation: f64,
}

#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, ::prost::Message)]
pub struct Pose3d {
    #[prost(double, tag = "1")]
    #[serde(with = "crate::value::json_float")]
    pub x: f64,
    #[prost(double, tag = "2")]
    #[serde(with = "crate::value::json_float")]
    pub y: f64,
    #[prost(double, tag = "3")]
    #[serde(with = "crate::value::json_float")]
    pub z: f64,
    #[prost(double, tag = "4")]
    #[serde(with = "crate::value::json_float")]
    pub roll: f64,
    #[prost(double, tag = "5")]
    #[serde(with = "crate::value::json_float")]
    pub pitch: f64,
    #[prost(double, tag = "6")]
    #[serde(with = "crate::value::json_float")]
    pub yaw: f64,
}

#[derive(Clone, Copy, PartialEq, Serialize, Deserialize, ::prost::Message)]
pub struct Coordinate {
    #[prost(double, tag = "1")]
    #[serde(with = "crate::value::json_float")]
    pub x: f64,
    #[prost(double, tag = "2")]
    #[serde(with = "crate::value::json_float")]
    pub y: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CoordinateList {
    #[prost(message, repeated, tag = "1")]
    pub coordinates: ::prost::alloc::vec::Vec<Coordinate>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize, ::prost::Message)]
pub struct BezierCurve {
    #[prost(message, repeated, tag = "1")]
    pub control_points: ::prost::alloc::vec::Vec<Coordinate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BezierCurves {
    #[prost(message, repeated, tag = "1")]
    pub curves: ::prost::alloc::vec::Vec<BezierCurve>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Command {
    UnknownCommand = 0,
    Put = 1,
    Get = 2,
    Delete = 3,
    GetTables = 4,
    SubscribeUpdate = 5,
    UnsubscribeUpdate = 6,
    SubscribeDelete = 7,
    UnsubscribeDelete = 8,
    Publish = 9,
    Ping = 10,
    Information = 11,
    RebootServer = 12,
    Debug = 13,
    GetRawJson = 14,
    GetProtoData = 15,
    Registry = 16,
    Batch = 17,
    UpdateKey = 18,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Category {
    Update = 0,
    Delete = 1,
    Publish = 2,
    Registry = 3,
    Log = 4,
    Information = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ValueType {
    Unknown = 0,
    String = 1,
    Int32 = 2,
    Int64 = 3,
    Double = 4,
    Bool = 5,
    Bytes = 6,
    StringList = 7,
    Int32List = 8,
    Int64List = 9,
    FloatList = 10,
    DoubleList = 11,
    BoolList = 12,
    BytesList = 13,
    Pose2d = 14,
    Pose3d = 15,
    Coordinates = 16,
    BezierCurves = 17,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReplyStatus {
    Ok = 0,
    NotFound = 1,
    InvalidKey = 2,
    Failed = 3,
    UnknownCommand = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}
