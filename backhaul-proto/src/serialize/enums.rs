use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use super::{ByteRead, ByteWrite};

// Both types lead with a presence byte, encoded exactly like a `bool`.

impl<T: ByteWrite> ByteWrite for Option<T> {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.is_some().write(writer).await?;
        match self {
            Some(value) => value.write(writer).await,
            None => Ok(()),
        }
    }
}

impl<T: ByteRead> ByteRead for Option<T> {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        match bool::read(reader).await? {
            true => Ok(Some(T::read(reader).await?)),
            false => Ok(None),
        }
    }
}

impl<T: ByteWrite, E: ByteWrite> ByteWrite for Result<T, E> {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.is_ok().write(writer).await?;
        match self {
            Ok(value) => value.write(writer).await,
            Err(error) => error.write(writer).await,
        }
    }
}

impl<T: ByteRead, E: ByteRead> ByteRead for Result<T, E> {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        match bool::read(reader).await? {
            true => Ok(Ok(T::read(reader).await?)),
            false => Ok(Err(E::read(reader).await?)),
        }
    }
}
