use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use backhaul_proto::{
    messages::{ChannelOpenFrame, ChannelOpenReply, OpenFailureReason},
    serialize::ByteWrite,
};
use quinn::{RecvStream, SendStream};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::Result;

/// A channel the peer asked to open, waiting to be accepted or rejected.
#[derive(Debug)]
pub struct IncomingChannel {
    channel_type: String,
    payload: Vec<u8>,
    send_stream: SendStream,
    recv_stream: RecvStream,
}

impl IncomingChannel {
    pub(super) fn new(frame: ChannelOpenFrame, send_stream: SendStream, recv_stream: RecvStream) -> Self {
        Self {
            channel_type: frame.channel_type,
            payload: frame.payload,
            send_stream,
            recv_stream,
        }
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn accept(mut self) -> Result<Channel> {
        ChannelOpenReply::confirmed().write(&mut self.send_stream).await?;
        Ok(Channel::new(self.send_stream, self.recv_stream))
    }

    pub async fn reject(mut self, reason: OpenFailureReason, description: &str) -> Result<()> {
        ChannelOpenReply::failed(reason, description)
            .write(&mut self.send_stream)
            .await?;
        self.send_stream.shutdown().await?;
        Ok(())
    }
}

/// An open channel. Reads and writes go straight to the underlying QUIC stream.
///
/// Shutting down the writer tells the peer no more data is coming. Dropping the channel closes it.
#[derive(Debug)]
pub struct Channel {
    send_stream: SendStream,
    recv_stream: RecvStream,
}

impl Channel {
    pub(super) fn new(send_stream: SendStream, recv_stream: RecvStream) -> Self {
        Self {
            send_stream,
            recv_stream,
        }
    }
}

impl AsyncRead for Channel {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.recv_stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Channel {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.send_stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.send_stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.send_stream).poll_shutdown(cx)
    }
}
