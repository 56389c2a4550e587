//! A secure, multiplexed session between a client and a server, on top of a QUIC connection.
//!
//! Every bidirectional stream opened on the connection starts with a [`StreamKind`] byte. The
//! client opens a single [`StreamKind::GlobalRequests`] stream right after the handshake and sends
//! all its global requests through it, in order. Any other stream is a channel: it starts with a
//! [`ChannelOpenFrame`] and, once the other side confirms it, carries raw bytes in both directions.

use std::net::SocketAddr;

use backhaul_proto::{
    messages::{ChannelOpenFrame, ChannelOpenFrameRef, ChannelOpenReply, StreamKind},
    serialize::{ByteRead, ByteWrite},
};
use quinn::{Connecting, Connection, RecvStream, SendStream, VarInt};

use crate::error::{Result, TunnelError};

mod channel;
mod global;

pub use channel::*;
pub use global::*;

/// Application close code sent when a session is closed on purpose.
pub const CLOSE_CODE_SHUTDOWN: u32 = 0;

/// Stream reset code for streams the receiving side refuses to handle.
pub const RESET_CODE_REFUSED: u32 = 1;

/// One authenticated QUIC connection. Cloning is cheap and yields a handle to the same session.
#[derive(Debug, Clone)]
pub struct Session {
    connection: Connection,
}

/// A stream the peer opened, before its header has been read.
#[derive(Debug)]
pub struct IncomingStream {
    send_stream: SendStream,
    recv_stream: RecvStream,
}

/// A stream the peer opened, identified by its header.
#[derive(Debug)]
pub enum Incoming {
    GlobalRequests(GlobalRequests),
    Channel(IncomingChannel),
}

impl Session {
    /// Completes the handshake of an incoming or outgoing connection.
    pub async fn handshake(connecting: Connecting) -> Result<Self> {
        let connection = connecting.await?;
        Ok(Self { connection })
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Waits for the peer to open a stream. An error means the session is over.
    ///
    /// The stream's header is not read here; see [`IncomingStream::identify`].
    pub async fn accept(&self) -> Result<IncomingStream> {
        let (send_stream, recv_stream) = self.connection.accept_bi().await?;
        Ok(IncomingStream {
            send_stream,
            recv_stream,
        })
    }

    /// Opens a channel and waits for the peer to confirm or reject it.
    pub async fn open_channel(&self, channel_type: &str, payload: &[u8]) -> Result<Channel> {
        let (mut send_stream, mut recv_stream) = self.connection.open_bi().await?;

        let frame = ChannelOpenFrameRef::new(channel_type, payload);
        (StreamKind::Channel, frame).write(&mut send_stream).await?;

        match ChannelOpenReply::read(&mut recv_stream).await?.result {
            Ok(()) => Ok(Channel::new(send_stream, recv_stream)),
            Err(failure) => Err(TunnelError::ChannelRejected {
                reason: failure.reason,
                description: failure.description,
            }),
        }
    }

    /// Opens the stream global requests are sent through. Clients call this once per session.
    pub async fn open_global_requests(&self) -> Result<GlobalRequester> {
        let (mut send_stream, recv_stream) = self.connection.open_bi().await?;
        StreamKind::GlobalRequests.write(&mut send_stream).await?;
        Ok(GlobalRequester::new(send_stream, recv_stream))
    }

    /// Closes the connection immediately. Streams still open on it fail.
    pub fn close(&self, reason: &str) {
        self.connection.close(VarInt::from_u32(CLOSE_CODE_SHUTDOWN), reason.as_bytes());
    }
}

impl IncomingStream {
    /// Reads the stream's header. Call this from the task that handles the stream, so a peer that
    /// is slow to send one header does not hold up the streams opened after it.
    ///
    /// An error only concerns this stream, which is discarded.
    pub async fn identify(self) -> Result<Incoming> {
        let Self {
            send_stream,
            mut recv_stream,
        } = self;

        match StreamKind::read(&mut recv_stream).await? {
            StreamKind::GlobalRequests => Ok(Incoming::GlobalRequests(GlobalRequests::new(send_stream, recv_stream))),
            StreamKind::Channel => {
                let frame = ChannelOpenFrame::read(&mut recv_stream).await?;
                Ok(Incoming::Channel(IncomingChannel::new(frame, send_stream, recv_stream)))
            }
        }
    }
}
