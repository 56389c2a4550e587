//! Splices two duplex byte streams together.
//!
//! [`pump`] copies in both directions at once. As soon as either direction finishes, by reaching
//! end of stream or by failing, the other direction is told to stop: a write already in progress
//! is completed, but nothing new is read. Each writer is then shut down once, and both streams are
//! dropped when the pump returns.
//!
//! Cancelling the token passed to [`pump`] has the same effect, except writers are not shut down
//! gracefully; they are simply dropped.

use tokio::{
    io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    select,
};
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub const PUMP_BUFFER_SIZE: usize = 16 * 1024;

/// How many bytes went through each direction of a [`pump`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

impl PumpStats {
    pub const fn total(&self) -> u64 {
        self.a_to_b + self.b_to_a
    }
}

/// Copies bytes from `a` to `b` and from `b` to `a` until either direction ends or `cancel` is
/// cancelled. Returns once both directions have stopped.
///
/// Errors are never returned, since they are terminal only to the direction they happened on.
/// They are logged at `trace` level.
pub async fn pump<A, B>(a: A, b: B, cancel: &CancellationToken) -> PumpStats
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let stop = cancel.child_token();
    let (a_reader, a_writer) = io::split(a);
    let (b_reader, b_writer) = io::split(b);

    let (a_to_b, b_to_a) = tokio::join!(
        copy_until_stopped(a_reader, b_writer, &stop, cancel, "a->b"),
        copy_until_stopped(b_reader, a_writer, &stop, cancel, "b->a"),
    );

    PumpStats { a_to_b, b_to_a }
}

async fn copy_until_stopped<R, W>(
    mut reader: ReadHalf<R>,
    mut writer: WriteHalf<W>,
    stop: &CancellationToken,
    cancel: &CancellationToken,
    direction: &'static str,
) -> u64
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let mut buf = vec![0u8; PUMP_BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let count = select! {
            biased;
            _ = stop.cancelled() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    trace!("Pump direction {direction} reached end of stream");
                    break;
                }
                Ok(count) => count,
                Err(error) => {
                    trace!("Pump direction {direction} failed to read: {error}");
                    break;
                }
            },
        };

        if let Err(error) = writer.write_all(&buf[..count]).await {
            trace!("Pump direction {direction} failed to write: {error}");
            break;
        }

        copied += count as u64;
    }

    stop.cancel();

    if !cancel.is_cancelled() {
        if let Err(error) = writer.shutdown().await {
            trace!("Pump direction {direction} failed to shut down its writer: {error}");
        }
    }

    copied
}
