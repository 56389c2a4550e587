use std::io::{self, Error, ErrorKind};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{ByteRead, ByteWrite};

/// The maximum length, in bytes, of a string or byte blob.
pub const MAX_BLOB_LENGTH: usize = 256 * 1024;

async fn write_blob<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    if bytes.len() > MAX_BLOB_LENGTH {
        return Err(Error::new(ErrorKind::InvalidData, "Blob is too long (> 256KB)"));
    }

    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(bytes).await
}

async fn read_blob<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_BLOB_LENGTH {
        return Err(Error::new(ErrorKind::InvalidData, format!("Blob length {len} exceeds the limit")));
    }

    let mut v = vec![0u8; len];
    reader.read_exact(&mut v).await?;
    Ok(v)
}

impl ByteWrite for str {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        write_blob(writer, self.as_bytes()).await
    }
}

impl ByteWrite for String {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        self.as_str().write(writer).await
    }
}

impl ByteRead for String {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        let bytes = read_blob(reader).await?;
        String::from_utf8(bytes).map_err(|_| Error::new(ErrorKind::InvalidData, "String is not valid UTF-8"))
    }
}

impl ByteWrite for [u8] {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        write_blob(writer, self).await
    }
}

impl ByteWrite for Vec<u8> {
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        write_blob(writer, self).await
    }
}

impl ByteRead for Vec<u8> {
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self> {
        read_blob(reader).await
    }
}
