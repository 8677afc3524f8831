//! Executes decoded commands against the store
//!
//! One dispatcher serves every connection of a server. Fire-and-forget
//! commands never produce a reply; request commands always produce exactly
//! one. A REBOOT_SERVER reply is returned together with the control command,
//! which the caller forwards only after the reply has been written, so a
//! handler never tears down its own channel.

use std::sync::Arc;

use prost::Message;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::metrics::MALFORMED_MESSAGES_TOTAL;
use crate::network::ChannelKind;
use crate::proto::ClientInfo;
use crate::proto::Command;
use crate::proto::LogLevel;
use crate::proto::ReplyStatus;
use crate::proto::TableMessage;
use crate::proto::TableUpdate;
use crate::server::ControlCommand;
use crate::server::ServerContext;
use crate::store::validate_key;
use crate::value::TypedValue;

/// Result of a request: the reply to send, then an optional control command.
#[derive(Debug)]
pub struct RequestOutcome {
    pub reply: TableMessage,
    pub control: Option<ControlCommand>,
}

impl From<TableMessage> for RequestOutcome {
    fn from(reply: TableMessage) -> Self {
        Self { reply, control: None }
    }
}

#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    ctx: Arc<ServerContext>,
}

impl CommandDispatcher {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Handle a fire-and-forget command. Invalid messages are logged and dropped.
    #[instrument(skip_all, fields(command = msg.command().as_str_name()))]
    pub fn handle_push(
        &self,
        msg: TableMessage,
    ) {
        match msg.command() {
            Command::Put | Command::Publish => self.apply_write(&msg),
            Command::Batch => {
                for entry in &msg.batch {
                    match entry.command() {
                        Command::Put | Command::Publish => self.apply_write(entry),
                        other => self.reject_push(&format!("{other} inside BATCH")),
                    }
                }
            }
            Command::Registry | Command::Information => self.accept_client_report(&msg),
            other => self.reject_push(&format!("unexpected {other} on push channel")),
        }
    }

    fn apply_write(
        &self,
        msg: &TableMessage,
    ) {
        let key = msg.key_str();
        if let Err(e) = validate_key(key) {
            return self.reject_push(&e.to_string());
        }
        let value = match msg.typed_value() {
            Some(Ok(value)) => value,
            Some(Err(e)) => return self.reject_push(&format!("bad payload for '{key}': {e}")),
            None => return self.reject_push(&format!("missing payload for '{key}'")),
        };

        let event = if msg.command() == Command::Put {
            let event = TableUpdate::updated(key, &value);
            // Key already validated above
            if let Err(e) = self.ctx.store.put(key, value) {
                return self.reject_push(&e.to_string());
            }
            event
        } else {
            TableUpdate::published(key, &value)
        };
        self.ctx.hub.publish(event);
    }

    fn accept_client_report(
        &self,
        msg: &TableMessage,
    ) {
        let info = match msg.value.as_deref().map(ClientInfo::decode) {
            Some(Ok(info)) => info,
            Some(Err(e)) => return self.reject_push(&format!("bad client report: {e}")),
            None => return self.reject_push("empty client report"),
        };
        let token = msg.id.as_deref().unwrap_or_default();
        let accepted = self.ctx.session.accept_report(token, info);
        debug!(accepted, "client report");
    }

    fn reject_push(
        &self,
        reason: &str,
    ) {
        warn!("dropping push message: {}", reason);
        MALFORMED_MESSAGES_TOTAL.with_label_values(&[ChannelKind::Push.as_str()]).inc();
        self.ctx.log_to_clients(LogLevel::Warn, format!("dropped push message: {reason}"));
    }

    /// Handle a synchronous request and build its single reply.
    #[instrument(skip_all, fields(command = msg.command().as_str_name()))]
    pub fn handle_request(
        &self,
        msg: TableMessage,
    ) -> RequestOutcome {
        let ok = || TableMessage::reply_to(&msg, ReplyStatus::Ok);
        let key = msg.key_str();

        match msg.command() {
            Command::Get => match self.ctx.store.get(key) {
                Ok(Some(value)) => ok().with_payload(&value).into(),
                Ok(None) => self.status(&msg, ReplyStatus::NotFound),
                Err(_) => self.status(&msg, ReplyStatus::InvalidKey),
            },
            Command::GetTables => match self.ctx.store.list_children(key) {
                Ok(Some(names)) => ok()
                    .with_payload(&TypedValue::StringList(names.into_iter().collect()))
                    .into(),
                Ok(None) => self.status(&msg, ReplyStatus::NotFound),
                Err(_) => self.status(&msg, ReplyStatus::InvalidKey),
            },
            Command::Delete => match self.ctx.store.delete(key) {
                Ok(true) => {
                    self.ctx.hub.publish(TableUpdate::deleted(key));
                    ok().into()
                }
                Ok(false) => self.status(&msg, ReplyStatus::NotFound),
                Err(_) => self.status(&msg, ReplyStatus::InvalidKey),
            },
            Command::UpdateKey => self.rename(&msg),
            Command::Ping => ok().into(),
            Command::Information => {
                let info = self.ctx.server_info().encode_to_vec();
                ok().with_payload(&TypedValue::Bytes(info)).into()
            }
            Command::RebootServer => {
                self.ctx.log_to_clients(LogLevel::Warn, "reboot requested");
                RequestOutcome {
                    reply: ok(),
                    control: Some(ControlCommand::Restart),
                }
            }
            Command::Debug => match msg.typed_value() {
                Some(Ok(TypedValue::Bool(enabled))) => {
                    self.ctx.set_debug(enabled);
                    ok().with_payload(&TypedValue::Bool(enabled)).into()
                }
                _ => self.status(&msg, ReplyStatus::Failed),
            },
            Command::GetRawJson => {
                let json = self.ctx.store.export_json().to_string();
                ok().with_payload(&TypedValue::String(json)).into()
            }
            Command::GetProtoData => ok().with_payload(&TypedValue::Bytes(self.ctx.store.serialize())).into(),
            other => {
                warn!(command = %other, "unsupported request");
                TableMessage {
                    key: msg.key.clone(),
                    command: Command::UnknownCommand as i32,
                    status: ReplyStatus::UnknownCommand as i32,
                    ..Default::default()
                }
                .into()
            }
        }
    }

    fn status(
        &self,
        msg: &TableMessage,
        status: ReplyStatus,
    ) -> RequestOutcome {
        if status == ReplyStatus::InvalidKey {
            MALFORMED_MESSAGES_TOTAL.with_label_values(&[ChannelKind::Request.as_str()]).inc();
        }
        TableMessage::reply_to(msg, status).into()
    }

    /// UPDATE_KEY: `key` is the old key, the STRING payload the new sibling name.
    fn rename(
        &self,
        msg: &TableMessage,
    ) -> RequestOutcome {
        let old_key = msg.key_str();
        let new_name = match msg.typed_value() {
            Some(Ok(TypedValue::String(name))) => name,
            _ => return self.status(msg, ReplyStatus::Failed),
        };
        match self.ctx.store.rename_with_entries(old_key, &new_name) {
            Ok(Some(moved)) => {
                self.ctx.hub.publish(TableUpdate::deleted(old_key));
                for (key, value) in moved {
                    self.ctx.hub.publish(TableUpdate::updated(key, &value));
                }
                TableMessage::reply_to(msg, ReplyStatus::Ok).into()
            }
            Ok(None) => self.status(msg, ReplyStatus::Failed),
            Err(_) => self.status(msg, ReplyStatus::InvalidKey),
        }
    }
}
