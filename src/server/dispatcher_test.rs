use std::collections::BTreeSet;
use std::sync::Arc;

use prost::Message;
use tokio::sync::mpsc;
use tracing_test::traced_test;

use super::*;
use crate::config::ServerConfig;
use crate::proto::Category;
use crate::proto::ClientInfo;
use crate::proto::Command;
use crate::proto::ReplyStatus;
use crate::proto::ServerInfo;
use crate::proto::TableMessage;
use crate::proto::ValueType;
use crate::store::TreeStore;
use crate::value::TypedValue;

struct Fixture {
    ctx: Arc<ServerContext>,
    dispatcher: CommandDispatcher,
    everything: Arc<Subscriber>,
    control_rx: mpsc::Receiver<ControlCommand>,
}

fn fixture() -> Fixture {
    let (tx, control_rx) = mpsc::channel(4);
    let ctx = Arc::new(ServerContext::new(ServerConfig::ephemeral(), tx));
    let everything = ctx.hub.register("127.0.0.1:1".parse().unwrap());
    ctx.hub.apply_subscription(everything.id, &TableMessage::subscribe_update(""));
    ctx.hub.apply_subscription(everything.id, &TableMessage::subscribe_delete(""));
    Fixture {
        dispatcher: CommandDispatcher::new(ctx.clone()),
        ctx,
        everything,
        control_rx,
    }
}

fn status(reply: &TableMessage) -> ReplyStatus {
    reply.status()
}

#[test]
fn test_put_stores_value_and_broadcasts_update() {
    let f = fixture();
    f.dispatcher.handle_push(TableMessage::put("robot.x", &TypedValue::Double(1.5)));

    assert_eq!(f.ctx.store.get("robot.x").unwrap(), Some(TypedValue::Double(1.5)));
    let events = f.everything.queue().drain_all();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].category(), Category::Update);
    assert_eq!(events[0].key, "robot.x");
}

#[test]
fn test_publish_broadcasts_without_storing() {
    let f = fixture();
    f.dispatcher.handle_push(TableMessage::publish("event", &TypedValue::Bool(true)));

    assert!(f.ctx.store.is_empty());
    let events = f.everything.queue().drain_all();
    assert_eq!(events[0].category(), Category::Publish);
}

#[test]
fn test_batch_applies_entries_in_order() {
    let f = fixture();
    f.dispatcher.handle_push(TableMessage::new_batch(vec![
        TableMessage::put("a", &TypedValue::Int32(1)),
        TableMessage::put("a", &TypedValue::Int32(2)),
        TableMessage::publish("b", &TypedValue::Int32(3)),
    ]));

    assert_eq!(f.ctx.store.get("a").unwrap(), Some(TypedValue::Int32(2)));
    assert_eq!(f.everything.queue().len(), 3);
}

#[test]
#[traced_test]
fn test_invalid_push_is_dropped() {
    let f = fixture();
    f.dispatcher.handle_push(TableMessage::put("a..b", &TypedValue::Int32(1)));
    let mut truncated = TableMessage::put("a", &TypedValue::Int64(1));
    truncated.value = Some(vec![0, 1]);
    f.dispatcher.handle_push(truncated);
    f.dispatcher.handle_push(TableMessage::get("a"));

    assert!(f.ctx.store.is_empty());
    assert!(f.everything.queue().is_empty());
    assert!(logs_contain("dropping push message"));
}

#[test]
fn test_client_report_registers_under_current_token() {
    let f = fixture();
    let token = f.ctx.session.current();
    let info = ClientInfo {
        id: "c1".to_string(),
        ..Default::default()
    };
    f.dispatcher
        .handle_push(TableMessage::client_report(Command::Registry, &token, info.encode_to_vec()));
    f.dispatcher
        .handle_push(TableMessage::client_report(Command::Information, b"stale", info.encode_to_vec()));

    assert_eq!(f.ctx.session.clients().len(), 1);
}

#[test]
fn test_get_replies_with_value_or_not_found() {
    let f = fixture();
    f.ctx.store.put("pose.x", TypedValue::Int32(4)).unwrap();

    let reply = f.dispatcher.handle_request(TableMessage::get("pose.x")).reply;
    assert_eq!(status(&reply), ReplyStatus::Ok);
    assert_eq!(reply.command(), Command::Get);
    assert_eq!(reply.typed_value().unwrap().unwrap(), TypedValue::Int32(4));

    let missing = f.dispatcher.handle_request(TableMessage::get("pose.y")).reply;
    assert_eq!(status(&missing), ReplyStatus::NotFound);

    let intermediate = f.dispatcher.handle_request(TableMessage::get("pose")).reply;
    assert_eq!(status(&intermediate), ReplyStatus::NotFound);

    let invalid = f.dispatcher.handle_request(TableMessage::get("pose.")).reply;
    assert_eq!(status(&invalid), ReplyStatus::InvalidKey);
}

#[test]
fn test_get_tables_lists_child_names() {
    let f = fixture();
    f.ctx.store.put("pose.x", TypedValue::Int32(1)).unwrap();
    f.ctx.store.put("pose.y", TypedValue::Int32(2)).unwrap();

    let reply = f.dispatcher.handle_request(TableMessage::get_tables("pose")).reply;
    assert_eq!(reply.r#type(), ValueType::StringList);
    assert_eq!(
        reply.typed_value().unwrap().unwrap(),
        TypedValue::StringList(vec!["x".to_string(), "y".to_string()])
    );

    let root = f.dispatcher.handle_request(TableMessage::get_tables("")).reply;
    assert_eq!(
        root.typed_value().unwrap().unwrap(),
        TypedValue::StringList(vec!["pose".to_string()])
    );

    let missing = f.dispatcher.handle_request(TableMessage::get_tables("nope")).reply;
    assert_eq!(status(&missing), ReplyStatus::NotFound);
}

#[test]
fn test_delete_removes_subtree_and_broadcasts() {
    let f = fixture();
    f.ctx.store.put("a.b.c", TypedValue::Int32(1)).unwrap();

    let reply = f.dispatcher.handle_request(TableMessage::delete("a.b")).reply;
    assert_eq!(status(&reply), ReplyStatus::Ok);
    assert_eq!(f.ctx.store.get("a.b.c").unwrap(), None);
    assert_eq!(f.ctx.store.list_children("a").unwrap(), Some(BTreeSet::new()));
    assert_eq!(f.ctx.store.size(), 0);
    let events = f.everything.queue().drain_all();
    assert_eq!(events[0].category(), Category::Delete);
    assert_eq!(events[0].key, "a.b");

    let again = f.dispatcher.handle_request(TableMessage::delete("a.b")).reply;
    assert_eq!(status(&again), ReplyStatus::NotFound);
}

#[test]
fn test_update_key_renames_and_announces() {
    let f = fixture();
    f.ctx.store.put("robot.arm.angle", TypedValue::Double(0.5)).unwrap();

    let reply = f
        .dispatcher
        .handle_request(TableMessage::update_key("robot.arm", "gripper"))
        .reply;
    assert_eq!(status(&reply), ReplyStatus::Ok);
    assert_eq!(
        f.ctx.store.get("robot.gripper.angle").unwrap(),
        Some(TypedValue::Double(0.5))
    );

    let events = f.everything.queue().drain_all();
    assert_eq!(events[0].category(), Category::Delete);
    assert_eq!(events[0].key, "robot.arm");
    assert_eq!(events[1].category(), Category::Update);
    assert_eq!(events[1].key, "robot.gripper.angle");
}

#[test]
fn test_update_key_onto_existing_sibling_fails() {
    let f = fixture();
    f.ctx.store.put("a", TypedValue::Int32(1)).unwrap();
    f.ctx.store.put("b", TypedValue::Int32(2)).unwrap();

    let reply = f.dispatcher.handle_request(TableMessage::update_key("a", "b")).reply;
    assert_eq!(status(&reply), ReplyStatus::Failed);
    assert_eq!(f.ctx.store.get("a").unwrap(), Some(TypedValue::Int32(1)));
}

#[test]
fn test_information_reports_server_state() {
    let f = fixture();
    f.ctx.store.put("a", TypedValue::Int32(1)).unwrap();

    let reply = f.dispatcher.handle_request(TableMessage::information()).reply;
    let bytes = match reply.typed_value().unwrap().unwrap() {
        TypedValue::Bytes(bytes) => bytes,
        other => panic!("unexpected payload {other:?}"),
    };
    let info = ServerInfo::decode(bytes.as_slice()).unwrap();
    assert_eq!(info.value_count, 1);
    assert_eq!(info.subscriber_count, 1);
    assert_eq!(info.session_token, *f.ctx.session.current());
}

#[test]
fn test_reboot_returns_reply_and_restart_control() {
    let f = fixture();
    let outcome = f.dispatcher.handle_request(TableMessage::reboot_server());

    assert_eq!(status(&outcome.reply), ReplyStatus::Ok);
    assert_eq!(outcome.control, Some(ControlCommand::Restart));
}

#[tokio::test]
async fn test_debug_toggle_forwards_logs() {
    let mut f = fixture();
    let logs = f.ctx.hub.register("127.0.0.1:2".parse().unwrap());
    f.ctx.hub.apply_subscription(logs.id, &TableMessage::subscribe_logs());

    let reply = f.dispatcher.handle_request(TableMessage::debug_toggle(true)).reply;
    assert_eq!(reply.typed_value().unwrap().unwrap(), TypedValue::Bool(true));
    f.dispatcher.handle_push(TableMessage::get("wrong.channel"));

    let event = logs.queue().read().await.unwrap();
    assert_eq!(event.category(), Category::Log);
    assert!(f.control_rx.try_recv().is_err());
}

#[test]
fn test_snapshot_requests_export_store() {
    let f = fixture();
    f.ctx.store.put("a.b", TypedValue::String("hi".to_string())).unwrap();

    let json = f.dispatcher.handle_request(TableMessage::raw_json()).reply;
    match json.typed_value().unwrap().unwrap() {
        TypedValue::String(text) => assert!(text.contains("hi")),
        other => panic!("unexpected payload {other:?}"),
    }

    let proto = f.dispatcher.handle_request(TableMessage::proto_data()).reply;
    let bytes = match proto.typed_value().unwrap().unwrap() {
        TypedValue::Bytes(bytes) => bytes,
        other => panic!("unexpected payload {other:?}"),
    };
    let copy = TreeStore::deserialize(&bytes).unwrap();
    assert_eq!(copy.get("a.b").unwrap(), Some(TypedValue::String("hi".to_string())));
}

#[test]
fn test_unsupported_request_gets_unknown_command_reply() {
    let f = fixture();
    let reply = f
        .dispatcher
        .handle_request(TableMessage::subscribe_update("x"))
        .reply;

    assert_eq!(reply.command(), Command::UnknownCommand);
    assert_eq!(status(&reply), ReplyStatus::UnknownCommand);
}
