use super::*;
use crate::constants::DEFAULT_BROADCAST_PORT;
use crate::constants::DEFAULT_PUSH_PORT;

#[test]
fn test_default_ports() {
    let address = ServerAddress::new("robot.local");
    assert_eq!(address.push_port, DEFAULT_PUSH_PORT);
    assert_eq!(address.broadcast_addr(), format!("robot.local:{DEFAULT_BROADCAST_PORT}"));
}

#[test]
fn test_with_ports_keeps_host() {
    let address = ServerAddress::new("10.0.0.7").with_ports(4000, 4001, 4002);
    assert_eq!(address.host, "10.0.0.7");
    assert_eq!(address.push_addr(), "10.0.0.7:4000");
    assert_eq!(address.request_addr(), "10.0.0.7:4001");
    assert_eq!(address.broadcast_addr(), "10.0.0.7:4002");
}

#[tokio::test]
async fn test_static_resolver_returns_its_address() {
    let address = ServerAddress::new("localhost").with_ports(1, 2, 3);
    let resolver = StaticResolver::new(address.clone());
    assert_eq!(resolver.resolve().await.unwrap(), address);
}
