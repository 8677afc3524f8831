use std::time::Duration;

use treebus::client::ClientBuilder;
use treebus::client::LocalMirror;
use treebus::value::TypedValue;
use treebus::Result;

use crate::common::client_config;
use crate::common::connect;
use crate::common::start_server;
use crate::common::wait_until;
use crate::common::READY_TIMEOUT;

/// Bootstrap from the snapshot, then follow live updates from another writer.
#[tokio::test]
async fn test_mirror_bootstraps_and_follows() -> Result<()> {
    let server = start_server().await?;
    let writer = connect(&server).await?;
    writer.put("fleet.r1.battery", 0.9)?;
    writer.put("fleet.r2.battery", 0.4)?;
    assert!(wait_until(Duration::from_secs(2), || server.context().store.size() == 2).await);

    let reader = connect(&server).await?;
    let mirror = LocalMirror::start(reader.clone()).await?;
    assert_eq!(mirror.get("fleet.r1.battery"), Some(TypedValue::Double(0.9)));
    assert_eq!(mirror.store().size(), 2);

    writer.put("fleet.r1.battery", 0.85)?;
    assert!(wait_until(Duration::from_secs(2), || mirror.get("fleet.r1.battery") == Some(TypedValue::Double(0.85))).await);

    writer.delete("fleet.r2").await?;
    assert!(wait_until(Duration::from_secs(2), || mirror.get_tables("fleet").map(|c| c.len()) == Some(1)).await);

    mirror.stop().await;
    writer.shutdown().await;
    reader.shutdown().await;
    server.stop().await;
    Ok(())
}

/// After a reboot the server is empty; the new session token triggers a
/// resync that clears the mirror without waiting for the periodic one.
#[tokio::test]
async fn test_mirror_resyncs_on_new_session() -> Result<()> {
    let server = start_server().await?;
    let mut config = client_config(&server);
    config.mirror_resync_interval_ms = 60_000;
    let client = ClientBuilder::from_config(config).build()?;
    client.wait_until_ready(READY_TIMEOUT).await?;
    assert!(wait_until(Duration::from_secs(2), || client.session_token().is_some()).await);

    client.put("zone.a", true)?;
    assert!(wait_until(Duration::from_secs(2), || server.context().store.size() == 1).await);
    let mirror = LocalMirror::start(client.clone()).await?;
    assert_eq!(mirror.get("zone.a"), Some(TypedValue::Bool(true)));

    client.reboot_server().await?;
    assert!(wait_until(READY_TIMEOUT, || mirror.store().is_empty()).await);

    mirror.stop().await;
    client.shutdown().await;
    server.stop().await;
    Ok(())
}
