use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use treebus::client::KeyUpdate;
use treebus::value::TypedValue;
use treebus::Result;

use crate::common::connect;
use crate::common::start_server;
use crate::common::wait_until;

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A writer and a subscriber on separate connections: one PUT produces
/// exactly one callback, and the tree is browsable level by level.
#[tokio::test]
async fn test_put_reaches_subscriber_exactly_once() -> Result<()> {
    let server = start_server().await?;
    let writer = connect(&server).await?;
    let reader = connect(&server).await?;

    let updates: Arc<Mutex<Vec<KeyUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    reader.subscribe("robot.pose.x", move |update| sink.lock().push(update.clone()))?;
    let ctx = server.context();
    assert!(
        wait_until(Duration::from_secs(2), || ctx
            .hub
            .subscriber_topics()
            .iter()
            .any(|(_, topics)| topics.contains("update:robot.pose.x")))
        .await
    );

    writer.put("robot.pose.x", 3.25)?;
    assert!(wait_until(Duration::from_secs(2), || !updates.lock().is_empty()).await);
    // Give a duplicate the chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;

    {
        let updates = updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].key, "robot.pose.x");
        assert_eq!(updates[0].value, TypedValue::Double(3.25));
    }
    assert_eq!(reader.get_tables("robot").await?, Some(names(&["pose"])));
    assert_eq!(reader.get_tables("robot.pose").await?, Some(names(&["x"])));
    assert_eq!(reader.get::<f64>("robot.pose.x").await?, Some(3.25));

    writer.shutdown().await;
    reader.shutdown().await;
    server.stop().await;
    Ok(())
}

/// Bursts to one key collapse on a slow consumer, but the final value is
/// always delivered and other keys are untouched.
#[tokio::test]
async fn test_slow_subscriber_sees_latest_value() -> Result<()> {
    let server = start_server().await?;
    let writer = connect(&server).await?;
    let reader = connect(&server).await?;

    let last = Arc::new(Mutex::new(None));
    let other = Arc::new(Mutex::new(None));
    let (l, o) = (last.clone(), other.clone());
    reader.subscribe("speed", move |update| {
        std::thread::sleep(Duration::from_millis(2));
        *l.lock() = Some(update.value.clone());
    })?;
    reader.subscribe("mode", move |update| *o.lock() = Some(update.value.clone()))?;
    let ctx = server.context();
    assert!(
        wait_until(Duration::from_secs(2), || ctx
            .hub
            .subscriber_topics()
            .iter()
            .any(|(_, topics)| topics.len() == 2))
        .await
    );

    writer.put("mode", "auto")?;
    for i in 0..200 {
        writer.put("speed", i)?;
    }

    assert!(wait_until(Duration::from_secs(5), || *last.lock() == Some(TypedValue::Int32(199))).await);
    assert_eq!(*other.lock(), Some(TypedValue::String("auto".to_string())));

    writer.shutdown().await;
    reader.shutdown().await;
    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_snapshot_survives_compressed_export() -> Result<()> {
    let server = start_server().await?;
    let client = connect(&server).await?;

    client.put("map.a", vec![1.0, 2.0])?;
    client.put("map.b.name", "dock")?;
    assert!(wait_until(Duration::from_secs(2), || server.context().store.size() == 2).await);

    let snapshot = client.snapshot().await?;
    let text = snapshot.export_compressed()?;
    let restored = treebus::store::TreeStore::import_compressed(&text)?;
    assert_eq!(restored.get("map.a")?, Some(TypedValue::DoubleList(vec![1.0, 2.0])));
    assert_eq!(restored.get("map.b.name")?, Some(TypedValue::String("dock".to_string())));

    let json = client.raw_json().await?;
    assert_eq!(json, restored.export_json());

    client.shutdown().await;
    server.stop().await;
    Ok(())
}
