use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::serialize::{ByteRead, ByteWrite};

/// Payload of both the `tcpip-forward` and the `cancel-tcpip-forward` global requests.
///
/// A `bind_port` of 0 asks the server to pick any port. For cancellation, `bind_port` is the port
/// the server reported back when the forward was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpipForwardRequest {
    pub bind_ip: String,
    pub bind_port: u32,
}

impl TcpipForwardRequest {
    pub fn new(bind_ip: impl Into<String>, bind_port: u32) -> Self {
        Self {
            bind_ip: bind_ip.into(),
            bind_port,
        }
    }
}

impl ByteWrite for TcpipForwardRequest {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        (&self.bind_ip, self.bind_port).write(writer).await
    }
}

impl ByteRead for TcpipForwardRequest {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let (bind_ip, bind_port) = <(String, u32)>::read(reader).await?;
        Ok(Self { bind_ip, bind_port })
    }
}

/// Reply payload of a successful `tcpip-forward` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpipForwardResponse {
    pub bound_port: u32,
}

impl TcpipForwardResponse {
    pub const fn new(bound_port: u32) -> Self {
        Self { bound_port }
    }
}

impl ByteWrite for TcpipForwardResponse {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.bound_port.write(writer).await
    }
}

impl ByteRead for TcpipForwardResponse {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        Ok(Self::new(u32::read(reader).await?))
    }
}

/// Payload of a `forwarded-tcpip` channel open: which forward the connection arrived at, and
/// where the connection came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedTcpipRequest {
    pub forward_ip: String,
    pub forward_port: u32,
    pub origin_ip: String,
    pub origin_port: u32,
}

impl ForwardedTcpipRequest {
    pub fn new(
        forward_ip: impl Into<String>,
        forward_port: u32,
        origin_ip: impl Into<String>,
        origin_port: u32,
    ) -> Self {
        Self {
            forward_ip: forward_ip.into(),
            forward_port,
            origin_ip: origin_ip.into(),
            origin_port,
        }
    }
}

impl ByteWrite for ForwardedTcpipRequest {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        (&self.forward_ip, self.forward_port, &self.origin_ip, self.origin_port)
            .write(writer)
            .await
    }
}

impl ByteRead for ForwardedTcpipRequest {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let (forward_ip, forward_port, origin_ip, origin_port) = <(String, u32, String, u32)>::read(reader).await?;
        Ok(Self {
            forward_ip,
            forward_port,
            origin_ip,
            origin_port,
        })
    }
}
