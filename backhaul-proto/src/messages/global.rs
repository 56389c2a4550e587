use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::serialize::{ByteRead, ByteWrite};

/// Global request type asking the server to listen on a port and forward connections back.
pub const TCPIP_FORWARD: &str = "tcpip-forward";

/// Global request type asking the server to stop a previously started forward.
pub const CANCEL_TCPIP_FORWARD: &str = "cancel-tcpip-forward";

/// Any global request type containing this substring is treated as a liveness ping.
pub const KEEPALIVE_MARKER: &str = "keepalive";

/// The keep-alive request type sent by our own client.
pub const KEEPALIVE_REQUEST: &str = "keepalive@openssh.com";

/// The global request types a server knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalRequestKind<'a> {
    TcpipForward,
    CancelTcpipForward,
    Keepalive,
    Unknown(&'a str),
}

impl<'a> GlobalRequestKind<'a> {
    pub fn parse(kind: &'a str) -> Self {
        match kind {
            TCPIP_FORWARD => Self::TcpipForward,
            CANCEL_TCPIP_FORWARD => Self::CancelTcpipForward,
            k if k.contains(KEEPALIVE_MARKER) => Self::Keepalive,
            k => Self::Unknown(k),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRequestFrame {
    pub kind: String,
    pub payload: Vec<u8>,
}

impl GlobalRequestFrame {
    pub const fn new(kind: String, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    pub fn as_frame_ref(&self) -> GlobalRequestFrameRef<'_> {
        GlobalRequestFrameRef::new(&self.kind, &self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalRequestFrameRef<'a> {
    pub kind: &'a str,
    pub payload: &'a [u8],
}

impl<'a> GlobalRequestFrameRef<'a> {
    pub const fn new(kind: &'a str, payload: &'a [u8]) -> Self {
        Self { kind, payload }
    }
}

impl<'a> ByteWrite for GlobalRequestFrameRef<'a> {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        (self.kind, self.payload).write(writer).await
    }
}

impl ByteWrite for GlobalRequestFrame {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.as_frame_ref().write(writer).await
    }
}

impl ByteRead for GlobalRequestFrame {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let (kind, payload) = <(String, Vec<u8>)>::read(reader).await?;
        Ok(Self { kind, payload })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalReplyFrame {
    pub success: bool,
    pub payload: Vec<u8>,
}

impl GlobalReplyFrame {
    pub const fn new(success: bool, payload: Vec<u8>) -> Self {
        Self { success, payload }
    }

    pub fn as_frame_ref(&self) -> GlobalReplyFrameRef<'_> {
        GlobalReplyFrameRef::new(self.success, &self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalReplyFrameRef<'a> {
    pub success: bool,
    pub payload: &'a [u8],
}

impl<'a> GlobalReplyFrameRef<'a> {
    pub const fn new(success: bool, payload: &'a [u8]) -> Self {
        Self { success, payload }
    }
}

impl<'a> ByteWrite for GlobalReplyFrameRef<'a> {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        (self.success, self.payload).write(writer).await
    }
}

impl ByteWrite for GlobalReplyFrame {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.as_frame_ref().write(writer).await
    }
}

impl ByteRead for GlobalReplyFrame {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let (success, payload) = <(bool, Vec<u8>)>::read(reader).await?;
        Ok(Self { success, payload })
    }
}
