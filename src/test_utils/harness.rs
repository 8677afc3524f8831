use std::time::Duration;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::config::ReconnectPolicy;
use crate::config::ServerConfig;
use crate::constants::DEFAULT_MAX_FRAME_LENGTH;
use crate::network::MessageSink;
use crate::network::MessageStream;
use crate::proto::TableMessage;
use crate::proto::TableUpdate;
use crate::server::Server;
use crate::server::ServerBuilder;

/// Loopback server on ephemeral ports with short timers.
pub async fn start_test_server() -> Server {
    let config = ServerConfig {
        session_interval_ms: 60_000,
        information_interval_ms: 60_000,
        restart_delay_ms: 20,
        ..ServerConfig::ephemeral()
    };
    ServerBuilder::from_config(config)
        .start()
        .await
        .expect("test server should start")
}

/// Client settings pointing at `server` with fast reconnects.
pub fn client_config_for(server: &Server) -> ClientConfig {
    let ports = server.ports().expect("server should be online");
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

/// Poll `condition` until it holds or `deadline` elapses.
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

/// One framed TCP connection speaking the wire protocol directly.
pub struct RawChannel<In> {
    pub sink: MessageSink<OwnedWriteHalf, TableMessage>,
    pub stream: MessageStream<OwnedReadHalf, In>,
}

impl<In: prost::Message + Default> RawChannel<In> {
    pub async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .expect("raw connect should succeed");
        let (read_half, write_half) = stream.into_split();
        Self {
            sink: MessageSink::new(write_half, DEFAULT_MAX_FRAME_LENGTH),
            stream: MessageStream::new(read_half, DEFAULT_MAX_FRAME_LENGTH),
        }
    }

    pub async fn send(
        &mut self,
        msg: &TableMessage,
    ) {
        self.sink.send(msg).await.expect("raw send should succeed");
    }

    pub async fn recv(&mut self) -> Option<In> {
        tokio::time::timeout(Duration::from_secs(2), self.stream.recv())
            .await
            .expect("raw recv timed out")
            .expect("raw recv failed")
    }
}

pub type RawRequest = RawChannel<TableMessage>;
pub type RawBroadcast = RawChannel<TableUpdate>;

impl RawRequest {
    pub async fn request(
        &mut self,
        msg: &TableMessage,
    ) -> TableMessage {
        self.send(msg).await;
        self.recv().await.expect("reply expected")
    }
}
