//! TCP listeners for the three server channels
//!
//! Each listener runs an accept loop that owns a [`JoinSet`] of connection
//! tasks. Cancelling the loop aborts every connection it accepted, so a
//! teardown never leaves a handler running against the next incarnation.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::errors::TransportError;
use crate::metrics::MALFORMED_MESSAGES_TOTAL;
use crate::metrics::MESSAGES_TOTAL;
use crate::network::ChannelKind;
use crate::network::MessageSink;
use crate::network::MessageStream;
use crate::proto::Command;
use crate::proto::ReplyStatus;
use crate::proto::TableMessage;
use crate::proto::TableUpdate;
use crate::server::announce_new_session;
use crate::server::CommandDispatcher;
use crate::server::ServerContext;
use crate::Result;

/// Ports the listeners actually bound. Port 0 in the config resolves here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundPorts {
    pub push: u16,
    pub request: u16,
    pub broadcast: u16,
}

pub(crate) struct Listeners {
    push: TcpListener,
    request: TcpListener,
    broadcast: TcpListener,
}

impl Listeners {
    pub(crate) async fn bind(
        host: &str,
        ports: BoundPorts,
    ) -> Result<Self> {
        Ok(Self {
            push: bind_one(host, ports.push).await?,
            request: bind_one(host, ports.request).await?,
            broadcast: bind_one(host, ports.broadcast).await?,
        })
    }

    pub(crate) fn ports(&self) -> Result<BoundPorts> {
        let port = |listener: &TcpListener| -> Result<u16> {
            Ok(listener.local_addr().map_err(TransportError::from)?.port())
        };
        Ok(BoundPorts {
            push: port(&self.push)?,
            request: port(&self.request)?,
            broadcast: port(&self.broadcast)?,
        })
    }

    /// Accept loops for all three channels, run until `cancel` fires.
    pub(crate) fn serve(
        self,
        ctx: Arc<ServerContext>,
        cancel: CancellationToken,
    ) -> [BoxedLoop; 3] {
        let dispatcher = CommandDispatcher::new(ctx.clone());
        let push = {
            let (ctx, dispatcher) = (ctx.clone(), dispatcher.clone());
            accept_loop(ChannelKind::Push, self.push, cancel.clone(), move |stream, peer| {
                serve_push(ctx.clone(), dispatcher.clone(), stream, peer)
            })
        };
        let request = {
            let ctx = ctx.clone();
            accept_loop(ChannelKind::Request, self.request, cancel.clone(), move |stream, peer| {
                serve_request(ctx.clone(), dispatcher.clone(), stream, peer)
            })
        };
        let broadcast = accept_loop(ChannelKind::Subscribe, self.broadcast, cancel, move |stream, peer| {
            serve_broadcast(ctx.clone(), stream, peer)
        });
        [Box::pin(push), Box::pin(request), Box::pin(broadcast)]
    }
}

pub(crate) type BoxedLoop = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

async fn bind_one(
    host: &str,
    port: u16,
) -> Result<TcpListener> {
    let addr = format!("{host}:{port}");
    match TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(source) => Err(TransportError::Connect { addr, source }.into()),
    }
}

async fn accept_loop<F, Fut>(
    channel: ChannelKind,
    listener: TcpListener,
    cancel: CancellationToken,
    handler: F,
) -> Result<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut connections = JoinSet::new();
    info!(%channel, addr = ?listener.local_addr().ok(), "listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, "set_nodelay failed: {}", e);
                    }
                    debug!(%channel, %peer, "connection accepted");
                    connections.spawn(handler(stream, peer));
                }
                Err(e) => warn!(%channel, "accept failed: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    connections.shutdown().await;
    debug!(%channel, "listener stopped");
    Ok(())
}

fn count_frame(
    ctx: &ServerContext,
    channel: ChannelKind,
) {
    ctx.counters.record(channel);
    MESSAGES_TOTAL.with_label_values(&[channel.as_str()]).inc();
}

fn count_malformed(channel: ChannelKind) {
    MALFORMED_MESSAGES_TOTAL.with_label_values(&[channel.as_str()]).inc();
}

async fn serve_push(
    ctx: Arc<ServerContext>,
    dispatcher: CommandDispatcher,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let mut reader = MessageStream::<_, TableMessage>::new(stream, ctx.config.max_frame_length);
    loop {
        match reader.recv().await {
            Ok(Some(msg)) => {
                count_frame(&ctx, ChannelKind::Push);
                dispatcher.handle_push(msg);
            }
            Ok(None) => break,
            Err(TransportError::Decode(e)) => {
                warn!(%peer, "undecodable push frame: {}", e);
                count_malformed(ChannelKind::Push);
            }
            Err(e) => {
                debug!(%peer, "push connection lost: {}", e);
                break;
            }
        }
    }
    debug!(%peer, "push connection closed");
}

async fn serve_request(
    ctx: Arc<ServerContext>,
    dispatcher: CommandDispatcher,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let (read_half, write_half) = stream.into_split();
    let max_frame_length = ctx.config.max_frame_length;
    let mut reader = MessageStream::<_, TableMessage>::new(read_half, max_frame_length);
    let mut writer = MessageSink::<_, TableMessage>::new(write_half, max_frame_length);

    loop {
        let outcome = match reader.recv().await {
            Ok(Some(msg)) => {
                count_frame(&ctx, ChannelKind::Request);
                dispatcher.handle_request(msg)
            }
            Ok(None) => break,
            Err(TransportError::Decode(e)) => {
                // Every request gets exactly one reply, even an unreadable one
                warn!(%peer, "undecodable request frame: {}", e);
                count_malformed(ChannelKind::Request);
                TableMessage {
                    command: Command::UnknownCommand as i32,
                    status: ReplyStatus::Failed as i32,
                    ..Default::default()
                }
                .into()
            }
            Err(e) => {
                debug!(%peer, "request connection lost: {}", e);
                break;
            }
        };

        if let Err(e) = writer.send(&outcome.reply).await {
            debug!(%peer, "reply not delivered: {}", e);
            break;
        }
        if let Some(control) = outcome.control {
            ctx.request_control(control);
        }
    }
    debug!(%peer, "request connection closed");
}

async fn serve_broadcast(
    ctx: Arc<ServerContext>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let subscriber = ctx.hub.register(peer);
    announce_new_session(&ctx);

    let (read_half, write_half) = stream.into_split();
    let max_frame_length = ctx.config.max_frame_length;
    let queue = subscriber.queue();

    let forward = async {
        let mut writer = MessageSink::<_, TableUpdate>::new(write_half, max_frame_length);
        while let Some(event) = queue.read().await {
            if let Err(e) = writer.send(&event).await {
                debug!(%peer, "broadcast write failed: {}", e);
                return;
            }
            count_frame(&ctx, ChannelKind::Subscribe);
        }
    };

    let listen = async {
        let mut reader = MessageStream::<_, TableMessage>::new(read_half, max_frame_length);
        loop {
            match reader.recv().await {
                Ok(Some(msg)) => {
                    if !ctx.hub.apply_subscription(subscriber.id, &msg) {
                        count_malformed(ChannelKind::Subscribe);
                    }
                }
                Ok(None) => return,
                Err(TransportError::Decode(e)) => {
                    warn!(%peer, "undecodable subscription frame: {}", e);
                    count_malformed(ChannelKind::Subscribe);
                }
                Err(e) => {
                    debug!(%peer, "broadcast connection lost: {}", e);
                    return;
                }
            }
        }
    };

    tokio::select! {
        _ = forward => {}
        _ = listen => {}
    }
    ctx.hub.remove(subscriber.id);
}
