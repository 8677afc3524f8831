//! Length-prefixed protobuf framing over any byte stream
//!
//! Every frame is a 4-byte big-endian length followed by one prost-encoded
//! message. A frame that fails to decode does not corrupt the stream: the
//! next frame boundary is still known, so receive loops log it and move on.

use std::marker::PhantomData;

use bytes::Bytes;
use futures::SinkExt;
use futures::StreamExt;
use prost::Message;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedRead;
use tokio_util::codec::FramedWrite;
use tokio_util::codec::LengthDelimitedCodec;

use crate::errors::TransportError;

fn codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Framed writer for one message type
pub struct MessageSink<W, M> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
    _message: PhantomData<fn(M)>,
}

impl<W, M> MessageSink<W, M>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    pub fn new(
        writer: W,
        max_frame_length: usize,
    ) -> Self {
        Self {
            inner: FramedWrite::new(writer, codec(max_frame_length)),
            _message: PhantomData,
        }
    }

    pub async fn send(
        &mut self,
        msg: &M,
    ) -> Result<(), TransportError> {
        self.inner.send(Bytes::from(msg.encode_to_vec())).await?;
        Ok(())
    }
}

/// Framed reader for one message type
pub struct MessageStream<R, M> {
    inner: FramedRead<R, LengthDelimitedCodec>,
    _message: PhantomData<fn() -> M>,
}

impl<R, M> MessageStream<R, M>
where
    R: AsyncRead + Unpin,
    M: Message + Default,
{
    pub fn new(
        reader: R,
        max_frame_length: usize,
    ) -> Self {
        Self {
            inner: FramedRead::new(reader, codec(max_frame_length)),
            _message: PhantomData,
        }
    }

    /// Next message, or `None` once the peer closed the stream.
    ///
    /// [`TransportError::Decode`] leaves the stream usable; any other error
    /// means the connection is gone.
    pub async fn recv(&mut self) -> Result<Option<M>, TransportError> {
        match self.inner.next().await {
            Some(Ok(bytes)) => Ok(Some(M::decode(&bytes[..])?)),
            Some(Err(e)) => Err(TransportError::Io(e)),
            None => Ok(None),
        }
    }
}
