use std::collections::BTreeSet;
use std::time::Duration;

use treebus::client::ClientBuilder;
use treebus::config::ReconnectPolicy;
use treebus::network::ConnectionState;
use treebus::server::ServerStatus;
use treebus::value::TypedValue;
use treebus::Error;
use treebus::Result;
use treebus::TransportError;

use crate::common::connect;
use crate::common::start_server;
use crate::common::wait_until;
use crate::common::SilentServer;
use crate::common::READY_TIMEOUT;

fn topics(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_forced_reconnect_resubscribes_exactly() -> Result<()> {
    let server = start_server().await?;
    let client = connect(&server).await?;
    client.subscribe("x", |_| {})?;
    client.subscribe("y", |_| {})?;

    let ctx = server.context();
    let expected = topics(&["update:x", "update:y"]);
    let resubscribed = || {
        let subscribers = ctx.hub.subscriber_topics();
        subscribers.len() == 1 && subscribers[0].1 == expected
    };
    assert!(wait_until(Duration::from_secs(2), resubscribed).await);

    for _ in 0..3 {
        client.force_reconnect();
        assert!(wait_until(Duration::from_secs(2), || client.state() != ConnectionState::Connected).await);
        client.wait_until_ready(READY_TIMEOUT).await?;
        assert!(wait_until(Duration::from_secs(2), resubscribed).await);
    }

    client.shutdown().await;
    server.stop().await;
    Ok(())
}

/// A reboot looks like any other reconnect at the transport level. Only the
/// session token tells the client the server lost its state.
#[tokio::test]
async fn test_reboot_is_visible_through_session_token() -> Result<()> {
    let server = start_server().await?;
    let client = connect(&server).await?;
    assert!(wait_until(Duration::from_secs(2), || client.session_token().is_some()).await);
    let before = client.session_token();
    let mut sessions = client.watch_session();

    client.put("robot.mode", "auto")?;
    assert!(wait_until(Duration::from_secs(2), || server.context().store.size() == 1).await);
    client.reboot_server().await?;

    tokio::time::timeout(READY_TIMEOUT, sessions.changed())
        .await
        .map_err(|_| Error::Fatal("session never changed".to_string()))?
        .map_err(|_| Error::Fatal("client dropped".to_string()))?;
    assert_ne!(client.session_token(), before);
    assert!(client.session_changes() >= 1);

    assert!(wait_until(READY_TIMEOUT, || server.status() == ServerStatus::Online).await);
    client.wait_until_ready(READY_TIMEOUT).await?;
    assert_eq!(client.get_value("robot.mode").await?, None);

    client.shutdown().await;
    server.stop().await;
    Ok(())
}

/// The client comes back on its own once the server does.
#[tokio::test]
async fn test_client_recovers_after_server_restart() -> Result<()> {
    let server = start_server().await?;
    let client = connect(&server).await?;

    server.stop().await;
    assert!(wait_until(Duration::from_secs(2), || client.state() != ConnectionState::Connected).await);
    assert!(matches!(client.put("a", 1), Err(Error::Transport(TransportError::NotConnected))));

    server.start().await?;
    client.wait_until_ready(READY_TIMEOUT).await?;
    client.put("a", 1)?;
    assert!(wait_until(Duration::from_secs(2), || server.context().store.size() == 1).await);
    assert_eq!(client.get_value("a").await?, Some(TypedValue::Int32(1)));

    client.shutdown().await;
    server.stop().await;
    Ok(())
}

/// A server that accepts but never answers yields a timeout, which is not
/// the same failure as having no connection at all.
#[tokio::test]
async fn test_timeout_is_distinct_from_not_connected() -> Result<()> {
    let silent = SilentServer::start().await.map_err(TransportError::from)?;
    let client = ClientBuilder::new()
        .address(silent.address.clone())
        .request_timeout(Duration::from_millis(200))
        .reconnect(ReconnectPolicy::fixed(20))
        .build()?;
    client.wait_until_ready(READY_TIMEOUT).await?;

    match client.ping().await {
        Err(Error::Timeout { command, .. }) => assert_eq!(command, "PING"),
        other => panic!("expected a timeout, got {other:?}"),
    }
    // The request channel is replaced and the client stays usable
    client.wait_until_ready(READY_TIMEOUT).await?;

    drop(silent);
    client.shutdown().await;
    assert!(matches!(
        client.ping().await,
        Err(Error::Transport(TransportError::NotConnected))
    ));
    Ok(())
}
