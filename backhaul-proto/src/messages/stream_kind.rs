use std::io::{self, Error, ErrorKind};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::serialize::{ByteRead, ByteWrite, U8ReprEnum};

/// The first byte sent on every stream, identifying what the stream is used for.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    GlobalRequests = 0,
    Channel = 1,
}

impl U8ReprEnum for StreamKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::GlobalRequests),
            1 => Some(Self::Channel),
            _ => None,
        }
    }

    fn into_u8(self) -> u8 {
        self as u8
    }
}

impl ByteWrite for StreamKind {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.into_u8().write(writer).await
    }
}

impl ByteRead for StreamKind {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        match Self::from_u8(u8::read(reader).await?) {
            Some(kind) => Ok(kind),
            None => Err(Error::new(ErrorKind::InvalidData, "Invalid StreamKind type byte")),
        }
    }
}
