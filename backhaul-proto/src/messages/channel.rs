use std::{
    fmt,
    io::{self, Error, ErrorKind},
};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::serialize::{ByteRead, ByteWrite};

/// Channel type opened by the server for every connection accepted on a forwarded port.
pub const FORWARDED_TCPIP: &str = "forwarded-tcpip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenFrame {
    pub channel_type: String,
    pub payload: Vec<u8>,
}

impl ChannelOpenFrame {
    pub const fn new(channel_type: String, payload: Vec<u8>) -> Self {
        Self { channel_type, payload }
    }

    pub fn as_frame_ref(&self) -> ChannelOpenFrameRef<'_> {
        ChannelOpenFrameRef::new(&self.channel_type, &self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOpenFrameRef<'a> {
    pub channel_type: &'a str,
    pub payload: &'a [u8],
}

impl<'a> ChannelOpenFrameRef<'a> {
    pub const fn new(channel_type: &'a str, payload: &'a [u8]) -> Self {
        Self { channel_type, payload }
    }
}

impl<'a> ByteWrite for ChannelOpenFrameRef<'a> {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        (self.channel_type, self.payload).write(writer).await
    }
}

impl ByteWrite for ChannelOpenFrame {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.as_frame_ref().write(writer).await
    }
}

impl ByteRead for ChannelOpenFrame {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let (channel_type, payload) = <(String, Vec<u8>)>::read(reader).await?;
        Ok(Self { channel_type, payload })
    }
}

/// Why a channel open was refused. The numeric values match SSH's `SSH_OPEN_*` reason codes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailureReason {
    AdministrativelyProhibited = 1,
    ConnectFailed = 2,
    UnknownChannelType = 3,
    ResourceShortage = 4,
}

impl OpenFailureReason {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::AdministrativelyProhibited),
            2 => Some(Self::ConnectFailed),
            3 => Some(Self::UnknownChannelType),
            4 => Some(Self::ResourceShortage),
            _ => None,
        }
    }

    pub fn into_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for OpenFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdministrativelyProhibited => write!(f, "administratively prohibited"),
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::UnknownChannelType => write!(f, "unknown channel type"),
            Self::ResourceShortage => write!(f, "resource shortage"),
        }
    }
}

impl ByteWrite for OpenFailureReason {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.into_u32().write(writer).await
    }
}

impl ByteRead for OpenFailureReason {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let value = u32::read(reader).await?;
        Self::from_u32(value)
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, format!("Invalid channel open failure reason {value}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenFailure {
    pub reason: OpenFailureReason,
    pub description: String,
}

impl ChannelOpenFailure {
    pub fn new(reason: OpenFailureReason, description: impl Into<String>) -> Self {
        Self {
            reason,
            description: description.into(),
        }
    }
}

impl fmt::Display for ChannelOpenFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.description)
    }
}

impl ByteWrite for ChannelOpenFailure {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        (self.reason, &self.description).write(writer).await
    }
}

impl ByteRead for ChannelOpenFailure {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let (reason, description) = <(OpenFailureReason, String)>::read(reader).await?;
        Ok(Self { reason, description })
    }
}

/// The answer to a [`ChannelOpenFrame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenReply {
    pub result: Result<(), ChannelOpenFailure>,
}

impl ChannelOpenReply {
    pub const fn confirmed() -> Self {
        Self { result: Ok(()) }
    }

    pub fn failed(reason: OpenFailureReason, description: impl Into<String>) -> Self {
        Self {
            result: Err(ChannelOpenFailure::new(reason, description)),
        }
    }
}

impl ByteWrite for ChannelOpenReply {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.result.write(writer).await
    }
}

impl ByteRead for ChannelOpenReply {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let result = <Result<(), ChannelOpenFailure>>::read(reader).await?;
        Ok(Self { result })
    }
}
