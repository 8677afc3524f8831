use std::time::Duration;

use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::Instant;
use treebus::client::Client;
use treebus::client::ClientBuilder;
use treebus::config::ClientConfig;
use treebus::config::ReconnectPolicy;
use treebus::config::ServerConfig;
use treebus::network::ServerAddress;
use treebus::server::Server;
use treebus::server::ServerBuilder;
use treebus::Result;

pub const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// In-process broker on ephemeral loopback ports.
pub async fn start_server() -> Result<Server> {
    let config = ServerConfig {
        session_interval_ms: 60_000,
        information_interval_ms: 60_000,
        restart_delay_ms: 20,
        ..ServerConfig::ephemeral()
    };
    ServerBuilder::from_config(config).start().await
}

pub fn client_config(server: &Server) -> ClientConfig {
    let ports = server.ports().unwrap_or_default();
    ClientConfig {
        host: "127.0.0.1".to_string(),
        push_port: ports.push,
        request_port: ports.request,
        broadcast_port: ports.broadcast,
        connect_timeout_ms: 500,
        request_timeout_ms: 1000,
        reconnect: ReconnectPolicy::fixed(20),
        ..Default::default()
    }
}

pub async fn connect(server: &Server) -> Result<Client> {
    let client = ClientBuilder::from_config(client_config(server)).build()?;
    client.wait_until_ready(READY_TIMEOUT).await?;
    Ok(client)
}

pub async fn wait_until<F>(
    deadline: Duration,
    mut condition: F,
) -> bool
where
    F: FnMut() -> bool,
{
    let until = Instant::now() + deadline;
    while Instant::now() < until {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Three listeners that accept connections and never answer anything.
pub struct SilentServer {
    pub address: ServerAddress,
    accept_task: JoinHandle<()>,
}

impl SilentServer {
    pub async fn start() -> std::io::Result<Self> {
        let listeners = [
            TcpListener::bind("127.0.0.1:0").await?,
            TcpListener::bind("127.0.0.1:0").await?,
            TcpListener::bind("127.0.0.1:0").await?,
        ];
        let ports: Vec<u16> = listeners
            .iter()
            .map(|l| l.local_addr().map(|a| a.port()))
            .collect::<std::io::Result<_>>()?;
        let address = ServerAddress::new("127.0.0.1").with_ports(ports[0], ports[1], ports[2]);

        let accept_task = tokio::spawn(async move {
            let mut held: Vec<TcpStream> = Vec::new();
            let [push, request, broadcast] = listeners;
            loop {
                let accepted = tokio::select! {
                    r = push.accept() => r,
                    r = request.accept() => r,
                    r = broadcast.accept() => r,
                };
                match accepted {
                    Ok((stream, _)) => held.push(stream),
                    Err(_) => break,
                }
            }
        });
        Ok(Self { address, accept_task })
    }
}

impl Drop for SilentServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
