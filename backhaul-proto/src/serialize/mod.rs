//! Defines the [`ByteRead`] and [`ByteWrite`] traits and implements them for the basic types the
//! protocol is built from.
//!
//! This includes `()`, [`bool`], [`u8`], [`u16`], [`u32`] and [`u64`], as well as [`str`]
//! (write-only), [`String`], `[u8]` (write-only), [`Vec<u8>`], [`Option<T>`], [`Result<T, E>`]
//! and tuples of up to 4 elements.
//!
//! # Integers
//! All integers are fixed-width and big-endian.
//!
//! # Serialization of strings and byte blobs
//! [`String`] and [`str`] are serialized the same way SSH serializes a `string`: an [`u32`]
//! indicating the length in bytes, followed by said amount of bytes. Byte blobs ([`Vec<u8>`] and
//! `[u8]`) use the same layout. Lengths above [`MAX_BLOB_LENGTH`] are refused on both ends, so a
//! malicious peer can't make us allocate arbitrary amounts of memory.
//!
//! # Serialization of [`Option<T>`] and [`Result<T, E>`]
//! Serializing an [`Option<T>`] consists of a presence byte, 1 if Some and 0 if None, and if 1
//! then this byte is followed by the serialization of `T`. Any other presence byte is invalid,
//! the same as for [`bool`]. A similar strategy is used for
//! [`Result<T, E>`], with the exception that if the presence byte is 0 then it is followed by the
//! serialization of `E`.
//!
//! # Serialization of tuples
//! [`ByteRead`] and [`ByteWrite`] are also implemented for tuples of up to 4 elements, which
//! allows turning multiple writes such as this:
//! ```ignore
//! thing1.write(writer).await?;
//! thing2.write(writer).await?;
//! thing3.write(writer).await?;
//! ```
//!
//! into this:
//! ```ignore
//! (thing1, thing2, thing3).write(writer).await?;
//! ```
//!
//! # Payloads
//! Request and channel payloads travel as opaque byte blobs inside frames. [`to_bytes`] and
//! [`from_bytes`] convert a message to and from such a blob. Decoding is strict: a payload with
//! bytes left over after the message is considered malformed.

use std::io::{self, Error, ErrorKind};

use tokio::io::{AsyncRead, AsyncWrite};

mod enums;
mod primitives;
mod string;
mod tuples;
mod u8_repr_enum;

pub use string::MAX_BLOB_LENGTH;
pub use u8_repr_enum::*;

/// Serializes a type into bytes, writing it to an [`AsyncWrite`] asynchronously.
#[allow(async_fn_in_trait)]
pub trait ByteWrite {
    /// Serializes this instance into bytes, writing those bytes into a writer.
    ///
    /// When an error occurs, there's no guarantee on how many bytes were written.
    async fn write<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> io::Result<()>;
}

/// Deserializes a type from raw bytes, reading it from an [`AsyncRead`] asynchronously.
#[allow(async_fn_in_trait)]
pub trait ByteRead: Sized {
    /// Deserializes bytes into an instance of this type by reading bytes from a reader.
    ///
    /// When an error occurs, there's no guarantee on how many bytes were read.
    async fn read<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Self>;
}

/// Serializes a message into an owned payload blob.
pub async fn to_bytes<T: ByteWrite + ?Sized>(value: &T) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.write(&mut buf).await?;
    Ok(buf)
}

/// Deserializes a message from a payload blob, failing if the blob is truncated or if any bytes
/// are left over once the message was read.
pub async fn from_bytes<T: ByteRead>(mut bytes: &[u8]) -> io::Result<T> {
    let value = T::read(&mut bytes).await?;
    match bytes.is_empty() {
        true => Ok(value),
        false => Err(Error::new(
            ErrorKind::InvalidData,
            format!("Payload has {} unexpected trailing bytes", bytes.len()),
        )),
    }
}
