use std::fmt;

use crate::errors::ValueError;
use crate::proto::Category;
use crate::proto::Command;
use crate::proto::LogLevel;
use crate::proto::LogRecord;
use crate::proto::ReplyStatus;
use crate::proto::TableMessage;
use crate::proto::TableUpdate;
use crate::proto::ValueType;
use crate::value::TypedValue;

impl TableMessage {
    fn with_key(
        command: Command,
        key: impl Into<String>,
    ) -> Self {
        Self {
            key: Some(key.into()),
            command: command as i32,
            ..Default::default()
        }
    }

    fn with_value(
        command: Command,
        key: impl Into<String>,
        value: &TypedValue,
    ) -> Self {
        Self {
            key: Some(key.into()),
            command: command as i32,
            value: Some(value.encode()),
            r#type: value.value_type() as i32,
            ..Default::default()
        }
    }

    fn bare(command: Command) -> Self {
        Self {
            command: command as i32,
            ..Default::default()
        }
    }

    pub fn put(
        key: impl Into<String>,
        value: &TypedValue,
    ) -> Self {
        Self::with_value(Command::Put, key, value)
    }

    pub fn publish(
        key: impl Into<String>,
        value: &TypedValue,
    ) -> Self {
        Self::with_value(Command::Publish, key, value)
    }

    /// Several PUT/PUBLISH messages applied in order by one frame.
    pub fn new_batch(entries: Vec<TableMessage>) -> Self {
        Self {
            command: Command::Batch as i32,
            batch: entries,
            ..Default::default()
        }
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self::with_key(Command::Get, key)
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::with_key(Command::Delete, key)
    }

    pub fn get_tables(key: impl Into<String>) -> Self {
        Self::with_key(Command::GetTables, key)
    }

    /// Rename `old_key` to the sibling `new_name`.
    pub fn update_key(
        old_key: impl Into<String>,
        new_name: &str,
    ) -> Self {
        Self::with_value(Command::UpdateKey, old_key, &TypedValue::String(new_name.to_string()))
    }

    pub fn ping() -> Self {
        Self::bare(Command::Ping)
    }

    pub fn information() -> Self {
        Self::bare(Command::Information)
    }

    pub fn reboot_server() -> Self {
        Self::bare(Command::RebootServer)
    }

    pub fn debug_toggle(enabled: bool) -> Self {
        Self::with_value(Command::Debug, "", &TypedValue::Bool(enabled))
    }

    pub fn raw_json() -> Self {
        Self::bare(Command::GetRawJson)
    }

    pub fn proto_data() -> Self {
        Self::bare(Command::GetProtoData)
    }

    pub fn subscribe_update(key: impl Into<String>) -> Self {
        Self::with_key(Command::SubscribeUpdate, key)
    }

    pub fn unsubscribe_update(key: impl Into<String>) -> Self {
        Self::with_key(Command::UnsubscribeUpdate, key)
    }

    pub fn subscribe_delete(key: impl Into<String>) -> Self {
        Self::with_key(Command::SubscribeDelete, key)
    }

    pub fn unsubscribe_delete(key: impl Into<String>) -> Self {
        Self::with_key(Command::UnsubscribeDelete, key)
    }

    pub fn subscribe_logs() -> Self {
        Self {
            command: Command::SubscribeUpdate as i32,
            category: Some(Category::Log as i32),
            ..Default::default()
        }
    }

    pub fn unsubscribe_logs() -> Self {
        Self {
            command: Command::UnsubscribeUpdate as i32,
            category: Some(Category::Log as i32),
            ..Default::default()
        }
    }

    /// Client statistics answering a REGISTRY or INFORMATION broadcast.
    pub fn client_report(
        command: Command,
        token: &[u8],
        info: Vec<u8>,
    ) -> Self {
        Self {
            command: command as i32,
            id: Some(token.to_vec()),
            value: Some(info),
            r#type: ValueType::Bytes as i32,
            ..Default::default()
        }
    }

    /// Reply skeleton echoing the request's command and key.
    pub fn reply_to(
        request: &TableMessage,
        status: ReplyStatus,
    ) -> Self {
        Self {
            key: request.key.clone(),
            command: request.command,
            status: status as i32,
            ..Default::default()
        }
    }

    pub fn with_payload(
        mut self,
        value: &TypedValue,
    ) -> Self {
        self.value = Some(value.encode());
        self.r#type = value.value_type() as i32;
        self
    }

    /// Decode the payload according to the declared type tag.
    ///
    /// `None` when the message carries no payload at all.
    pub fn typed_value(&self) -> Option<Result<TypedValue, ValueError>> {
        let bytes = self.value.as_deref()?;
        Some(decode_tagged(self.r#type, bytes))
    }

    pub fn key_str(&self) -> &str {
        self.key.as_deref().unwrap_or_default()
    }

    pub fn is_log_subscription(&self) -> bool {
        self.category == Some(Category::Log as i32)
    }
}

impl TableUpdate {
    fn event(
        category: Category,
        key: impl Into<String>,
        value: &TypedValue,
    ) -> Self {
        Self {
            key: key.into(),
            category: category as i32,
            value: value.encode(),
            r#type: value.value_type() as i32,
        }
    }

    pub fn updated(
        key: impl Into<String>,
        value: &TypedValue,
    ) -> Self {
        Self::event(Category::Update, key, value)
    }

    pub fn published(
        key: impl Into<String>,
        value: &TypedValue,
    ) -> Self {
        Self::event(Category::Publish, key, value)
    }

    pub fn deleted(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            category: Category::Delete as i32,
            ..Default::default()
        }
    }

    pub fn registry(token: &[u8]) -> Self {
        Self::event(Category::Registry, "", &TypedValue::Bytes(token.to_vec()))
    }

    pub fn session_information(token: &[u8]) -> Self {
        Self::event(Category::Information, "", &TypedValue::Bytes(token.to_vec()))
    }

    pub fn log(record: &LogRecord) -> Self {
        use prost::Message;
        Self {
            key: String::new(),
            category: Category::Log as i32,
            value: record.encode_to_vec(),
            r#type: ValueType::Bytes as i32,
        }
    }

    pub fn typed_value(&self) -> Result<TypedValue, ValueError> {
        decode_tagged(self.r#type, &self.value)
    }
}

fn decode_tagged(
    tag: i32,
    bytes: &[u8],
) -> Result<TypedValue, ValueError> {
    let value_type = ValueType::try_from(tag).map_err(|_| ValueError::UnknownTag(tag))?;
    TypedValue::decode(value_type, bytes)
}

impl Command {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Command::UnknownCommand => "UNKNOWN_COMMAND",
            Command::Put => "PUT",
            Command::Get => "GET",
            Command::Delete => "DELETE",
            Command::GetTables => "GET_TABLES",
            Command::SubscribeUpdate => "SUBSCRIBE_UPDATE",
            Command::UnsubscribeUpdate => "UNSUBSCRIBE_UPDATE",
            Command::SubscribeDelete => "SUBSCRIBE_DELETE",
            Command::UnsubscribeDelete => "UNSUBSCRIBE_DELETE",
            Command::Publish => "PUBLISH",
            Command::Ping => "PING",
            Command::Information => "INFORMATION",
            Command::RebootServer => "REBOOT_SERVER",
            Command::Debug => "DEBUG",
            Command::GetRawJson => "GET_RAW_JSON",
            Command::GetProtoData => "GET_PROTO_DATA",
            Command::Registry => "REGISTRY",
            Command::Batch => "BATCH",
            Command::UpdateKey => "UPDATE_KEY",
        }
    }

    /// Commands answered on the request/reply channel.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            Command::Get
                | Command::Delete
                | Command::GetTables
                | Command::Ping
                | Command::Information
                | Command::RebootServer
                | Command::Debug
                | Command::GetRawJson
                | Command::GetProtoData
                | Command::UpdateKey
        )
    }
}

impl fmt::Display for Command {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str_name())
    }
}

impl Category {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Category::Update => "UPDATE",
            Category::Delete => "DELETE",
            Category::Publish => "PUBLISH",
            Category::Registry => "REGISTRY",
            Category::Log => "LOG",
            Category::Information => "INFORMATION",
        }
    }
}

impl ReplyStatus {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            ReplyStatus::Ok => "OK",
            ReplyStatus::NotFound => "NOT_FOUND",
            ReplyStatus::InvalidKey => "INVALID_KEY",
            ReplyStatus::Failed => "FAILED",
            ReplyStatus::UnknownCommand => "UNKNOWN_COMMAND",
        }
    }
}

impl ValueType {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            ValueType::Unknown => "UNKNOWN",
            ValueType::String => "STRING",
            ValueType::Int32 => "INT32",
            ValueType::Int64 => "INT64",
            ValueType::Double => "DOUBLE",
            ValueType::Bool => "BOOL",
            ValueType::Bytes => "BYTES",
            ValueType::StringList => "STRING_LIST",
            ValueType::Int32List => "INTEGER_LIST",
            ValueType::Int64List => "LONG_LIST",
            ValueType::FloatList => "FLOAT_LIST",
            ValueType::DoubleList => "DOUBLE_LIST",
            ValueType::BoolList => "BOOLEAN_LIST",
            ValueType::BytesList => "BYTES_LIST",
            ValueType::Pose2d => "POSE2D",
            ValueType::Pose3d => "POSE3D",
            ValueType::Coordinates => "COORDINATES",
            ValueType::BezierCurves => "BEZIER_CURVES",
        }
    }

    pub fn from_str_name(value: &str) -> Option<Self> {
        let value_type = match value {
            "UNKNOWN" => ValueType::Unknown,
            "STRING" => ValueType::String,
            "INT32" => ValueType::Int32,
            "INT64" => ValueType::Int64,
            "DOUBLE" => ValueType::Double,
            "BOOL" => ValueType::Bool,
            "BYTES" => ValueType::Bytes,
            "STRING_LIST" => ValueType::StringList,
            "INTEGER_LIST" => ValueType::Int32List,
            "LONG_LIST" => ValueType::Int64List,
            "FLOAT_LIST" => ValueType::FloatList,
            "DOUBLE_LIST" => ValueType::DoubleList,
            "BOOLEAN_LIST" => ValueType::BoolList,
            "BYTES_LIST" => ValueType::BytesList,
            "POSE2D" => ValueType::Pose2d,
            "POSE3D" => ValueType::Pose3d,
            "COORDINATES" => ValueType::Coordinates,
            "BEZIER_CURVES" => ValueType::BezierCurves,
            _ => return None,
        };
        Some(value_type)
    }
}

impl LogLevel {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}
