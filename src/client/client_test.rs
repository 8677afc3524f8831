use std::collections::BTreeSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::errors::KeyFormatError;
use crate::errors::TransportError;
use crate::proto::Category;
use crate::proto::ValueType;
use crate::server::Server;
use crate::test_utils::client_config_for;
use crate::test_utils::start_test_server;
use crate::test_utils::wait_until;
use crate::value::TypedValue;
use crate::Error;

const READY: Duration = Duration::from_secs(3);

async fn connected_client(server: &Server) -> Client {
    let client = ClientBuilder::from_config(client_config_for(server)).build().unwrap();
    client.wait_until_ready(READY).await.unwrap();
    client
}

/// Push is fire-and-forget; poll until the server has applied it.
async fn wait_for_value(
    client: &Client,
    key: &str,
    expected: TypedValue,
) -> bool {
    for _ in 0..200 {
        if client.get_value(key).await.ok().flatten().as_ref() == Some(&expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_put_then_typed_get() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;

    client.put("robot.pose.x", 2.75).unwrap();
    assert!(wait_for_value(&client, "robot.pose.x", TypedValue::Double(2.75)).await);

    let x: Option<f64> = client.get("robot.pose.x").await.unwrap();
    assert_eq!(x, Some(2.75));
    let missing: Option<f64> = client.get("robot.pose.z").await.unwrap();
    assert_eq!(missing, None);

    match client.get::<bool>("robot.pose.x").await.unwrap_err() {
        Error::TypeMismatch { key, expected, actual } => {
            assert_eq!(key, "robot.pose.x");
            assert_eq!(expected, ValueType::Bool);
            assert_eq!(actual, ValueType::Double);
        }
        other => panic!("unexpected error: {other}"),
    }

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_invalid_keys_fail_locally() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;

    assert!(matches!(client.put("a..b", 1), Err(Error::KeyFormat(KeyFormatError::ConsecutiveSeparators(_)))));
    assert!(matches!(client.put("", 1), Err(Error::KeyFormat(_))));
    assert!(matches!(client.subscribe(".x", |_| {}), Err(Error::KeyFormat(_))));
    assert!(matches!(client.rename("a", "b.c").await, Err(Error::KeyFormat(_))));

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_get_tables_and_delete() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;

    client
        .put_batch([
            ("robot.pose.x", TypedValue::Double(1.0)),
            ("robot.pose.y", TypedValue::Double(2.0)),
            ("robot.name", TypedValue::String("r2".into())),
        ])
        .unwrap();
    assert!(wait_for_value(&client, "robot.name", TypedValue::String("r2".into())).await);

    assert_eq!(client.get_tables("").await.unwrap(), Some(names(&["robot"])));
    assert_eq!(client.get_tables("robot").await.unwrap(), Some(names(&["name", "pose"])));
    assert_eq!(client.get_tables("robot.pose.x").await.unwrap(), Some(BTreeSet::new()));
    assert_eq!(client.get_tables("nothing").await.unwrap(), None);

    assert!(client.delete("robot.pose").await.unwrap());
    assert!(!client.delete("robot.pose").await.unwrap());
    assert_eq!(client.get_value("robot.pose.x").await.unwrap(), None);
    assert!(client.delete_all().await.unwrap());
    assert_eq!(client.get_tables("").await.unwrap(), Some(BTreeSet::new()));

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_rename_moves_subtree() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;

    client.put("arm.joint.a", 1).unwrap();
    client.put("arm.grip", true).unwrap();
    assert!(wait_for_value(&client, "arm.grip", TypedValue::Bool(true)).await);

    assert!(client.rename("arm.joint", "wrist").await.unwrap());
    assert_eq!(client.get_value("arm.wrist.a").await.unwrap(), Some(TypedValue::Int32(1)));
    assert_eq!(client.get_value("arm.joint.a").await.unwrap(), None);
    // Target taken
    assert!(!client.rename("arm.wrist", "grip").await.unwrap());
    assert!(!client.rename("arm.missing", "other").await.unwrap());

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_subscribe_receives_each_update_once() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    client
        .subscribe("pose.x", move |update| s.lock().push(update.clone()))
        .unwrap();
    let other = Arc::new(AtomicUsize::new(0));
    let o = other.clone();
    client
        .subscribe("pose.y", move |_| {
            o.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    // Let the subscription reach the server
    client.ping().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.put("pose.x", 2.75).unwrap();
    assert!(wait_until(Duration::from_secs(2), || !seen.lock().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].key, "pose.x");
    assert_eq!(seen[0].category, Category::Update);
    assert_eq!(seen[0].value, TypedValue::Double(2.75));
    assert_eq!(other.load(Ordering::SeqCst), 0);

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_publish_is_delivered_but_not_stored() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;
    let published = Arc::new(AtomicUsize::new(0));
    let p = published.clone();
    client
        .subscribe("cmd.stop", move |update| {
            if update.category == Category::Publish {
                p.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    client.ping().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.publish("cmd.stop", true).unwrap();
    assert!(wait_until(Duration::from_secs(2), || published.load(Ordering::SeqCst) == 1).await);
    assert_eq!(client.get_value("cmd.stop").await.unwrap(), None);

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_delete_subscription() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;
    let deleted = Arc::new(Mutex::new(Vec::new()));
    let d = deleted.clone();
    client
        .subscribe_delete("", move |key| d.lock().push(key.to_string()))
        .unwrap();

    client.put("a.b", 1).unwrap();
    assert!(wait_for_value(&client, "a.b", TypedValue::Int32(1)).await);
    assert!(client.delete("a").await.unwrap());

    assert!(wait_until(Duration::from_secs(2), || deleted.lock().len() == 1).await);
    assert_eq!(deleted.lock()[0], "a");

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_unsubscribe_stops_callbacks() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let id = client
        .subscribe("k", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(client.unsubscribe(id));
    assert!(!client.unsubscribe(id));
    assert!(client.subscribed_topics().is_empty());
    let ctx = server.context();
    assert!(
        wait_until(Duration::from_secs(2), || ctx
            .hub
            .subscriber_topics()
            .iter()
            .all(|(_, topics)| topics.is_empty()))
        .await
    );

    client.put("k", 1).unwrap();
    assert!(wait_for_value(&client, "k", TypedValue::Int32(1)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_reconnect_replays_each_topic_exactly_once() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;
    client.subscribe("x", |_| {}).unwrap();
    client.subscribe("x", |_| {}).unwrap();
    client.subscribe("y", |_| {}).unwrap();

    let ctx = server.context();
    let expected = names(&["update:x", "update:y"]);
    let has_expected_topics = || {
        let subscribers = ctx.hub.subscriber_topics();
        subscribers.len() == 1 && subscribers[0].1 == expected
    };
    assert!(wait_until(Duration::from_secs(2), has_expected_topics).await);

    client.force_reconnect();
    assert!(wait_until(Duration::from_secs(2), || client.state() != crate::network::ConnectionState::Connected).await);
    client.wait_until_ready(READY).await.unwrap();
    assert!(wait_until(Duration::from_secs(2), has_expected_topics).await);

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_reboot_rotates_session_and_clears_store() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;
    assert!(wait_until(Duration::from_secs(2), || client.session_token().is_some()).await);
    let before = client.session_token();

    client.put("k", 1).unwrap();
    assert!(wait_for_value(&client, "k", TypedValue::Int32(1)).await);
    client.reboot_server().await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || client.session_changes() >= 1).await);
    assert_ne!(client.session_token(), before);
    client.wait_until_ready(READY).await.unwrap();
    assert!(wait_until(Duration::from_secs(2), || server.status() == crate::server::ServerStatus::Online).await);
    assert_eq!(client.get_value("k").await.unwrap(), None);

    client.shutdown().await;
    server.stop().await;
}

/// The server closes every channel right after answering REBOOT_SERVER; the
/// caller must still get the OK.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reboot_reply_survives_teardown() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;
    assert!(wait_until(Duration::from_secs(2), || client.session_token().is_some()).await);

    for round in 0..5 {
        let changes = client.session_changes();
        if let Err(e) = client.reboot_server().await {
            panic!("reboot {round} failed: {e:?}");
        }
        assert!(wait_until(Duration::from_secs(5), || client.session_changes() > changes).await);
        assert!(wait_until(Duration::from_secs(5), || server.status() == crate::server::ServerStatus::Online).await);
        client.wait_until_ready(READY).await.unwrap();
    }

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_requests_fail_fast_after_server_stops() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;
    server.stop().await;

    assert!(wait_until(Duration::from_secs(2), || client.state() != crate::network::ConnectionState::Connected).await);
    assert!(matches!(
        client.ping().await,
        Err(Error::Transport(TransportError::NotConnected))
    ));
    assert!(matches!(
        client.put("k", 1),
        Err(Error::Transport(TransportError::NotConnected))
    ));

    client.shutdown().await;
}

#[tokio::test]
async fn test_admin_requests() {
    let server = start_test_server().await;
    let client = ClientBuilder::from_config(client_config_for(&server))
        .client_id("admin-test")
        .build()
        .unwrap();
    client.wait_until_ready(READY).await.unwrap();

    client.put("robot.speed", 0.5).unwrap();
    assert!(wait_for_value(&client, "robot.speed", TypedValue::Double(0.5)).await);

    assert!(client.ping().await.unwrap() < Duration::from_secs(1));
    assert!(client.set_server_debug(true).await.unwrap());
    assert!(server.context().is_debug());

    let json = client.raw_json().await.unwrap();
    assert!(json.to_string().contains("speed"));

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.get("robot.speed").unwrap(), Some(TypedValue::Double(0.5)));

    // The client answers the session announcement with a report
    let mut info = client.server_info().await.unwrap();
    for _ in 0..100 {
        if info.clients.iter().any(|c| c.id == "admin-test") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        info = client.server_info().await.unwrap();
    }
    assert_eq!(info.status, "ONLINE");
    assert_eq!(info.value_count, 1);
    assert!(info.debug);
    assert!(info.clients.iter().any(|c| c.id == "admin-test"));

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_log_subscription_while_debugging() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;
    let logs = Arc::new(Mutex::new(Vec::new()));
    let l = logs.clone();
    client.subscribe_logs(move |record| l.lock().push(record.message.clone()));
    client.set_server_debug(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.context().log_to_clients(crate::proto::LogLevel::Info, "hello from server");

    assert!(wait_until(Duration::from_secs(2), || logs.lock().iter().any(|m| m == "hello from server")).await);

    client.shutdown().await;
    server.stop().await;
}

#[tokio::test]
async fn test_mirror_follows_server() {
    let server = start_test_server().await;
    let client = connected_client(&server).await;
    client.put("map.a", 1).unwrap();
    assert!(wait_for_value(&client, "map.a", TypedValue::Int32(1)).await);

    let mirror = LocalMirror::start(client.clone()).await.unwrap();
    assert_eq!(mirror.get("map.a"), Some(TypedValue::Int32(1)));

    client.put("map.b", 2).unwrap();
    assert!(wait_until(Duration::from_secs(2), || mirror.get("map.b") == Some(TypedValue::Int32(2))).await);
    assert_eq!(mirror.get_tables("map"), Some(names(&["a", "b"])));

    // Published values are never mirrored
    client.publish("map.c", 3).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mirror.get("map.c"), None);

    assert!(client.delete("map.a").await.unwrap());
    assert!(wait_until(Duration::from_secs(2), || mirror.get("map.a").is_none()).await);

    // Changes the broadcast missed are healed by a resync
    server.context().store.put("map.hidden", TypedValue::Bool(true)).unwrap();
    mirror.resync_now().await.unwrap();
    assert_eq!(mirror.get("map.hidden"), Some(TypedValue::Bool(true)));

    mirror.stop().await;
    assert!(client.subscribed_topics().is_empty());
    client.shutdown().await;
    server.stop().await;
}

#[test]
fn test_admin_reply_status_is_checked_before_payload() {
    use super::client::require_ok;
    use crate::proto::ReplyStatus;
    use crate::proto::TableMessage;

    let request = TableMessage::information();
    assert!(require_ok(&TableMessage::reply_to(&request, ReplyStatus::Ok), "").is_ok());

    let rejected = TableMessage::reply_to(&request, ReplyStatus::UnknownCommand)
        .with_payload(&TypedValue::String("ignored".to_string()));
    match require_ok(&rejected, "") {
        Err(Error::Fatal(message)) => assert!(message.contains("UNKNOWN_COMMAND")),
        other => panic!("unexpected {other:?}"),
    }
}
