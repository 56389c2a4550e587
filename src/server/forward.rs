//! One forward: a TCP listener whose connections are carried back to the client through channels.
//!
//! The accept loop and every bridge run as separate tasks, tracked together so a caller can wait
//! for all of them to finish. Draining closes the listener but lets bridges already running carry
//! on until either end of their connection closes, or until the session is cancelled.

use std::{
    future::Future,
    io::{self, ErrorKind},
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use backhaul_proto::{
    messages::{ForwardedTcpipRequest, TcpipForwardRequest, FORWARDED_TCPIP},
    serialize::to_bytes,
};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{error::Result, pump::pump, session::Session};

/// Wait after the first failed accept. Doubles on every consecutive failure, up to
/// [`ACCEPT_BACKOFF_MAX`].
const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(20);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct Forward {
    bind_ip: String,
    bound_port: u16,
    drain: CancellationToken,
    listener_closed: CancellationToken,
    tracker: TaskTracker,
}

/// Everything a bridge needs to know about the forward it was accepted on.
#[derive(Debug, Clone)]
struct ForwardContext {
    session: Session,
    bind_ip: String,
    bound_port: u16,
    session_cancel: CancellationToken,
}

impl Forward {
    /// Binds a listener on an ephemeral port of `listen_ip` and starts accepting on it.
    ///
    /// The port in `request` is ignored; the OS always picks the port. The requested bind IP is
    /// only echoed back to the client in every forwarded channel.
    pub async fn open(
        session: Session,
        request: &TcpipForwardRequest,
        listen_ip: IpAddr,
        session_cancel: &CancellationToken,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(listen_ip, 0)).await?;
        let bound_port = listener.local_addr()?.port();

        let drain = session_cancel.child_token();
        let listener_closed = CancellationToken::new();
        let tracker = TaskTracker::new();

        let context = ForwardContext {
            session,
            bind_ip: request.bind_ip.clone(),
            bound_port,
            session_cancel: session_cancel.clone(),
        };

        let span = info_span!("forward", port = bound_port);
        tracker.spawn_local(
            accept_loop(listener, context, drain.clone(), listener_closed.clone(), tracker.clone()).instrument(span),
        );

        Ok(Self {
            bind_ip: request.bind_ip.clone(),
            bound_port,
            drain,
            listener_closed,
            tracker,
        })
    }

    pub fn bound_port(&self) -> u16 {
        self.bound_port
    }

    /// Whether this forward was created for the given cancel request.
    pub fn matches(&self, request: &TcpipForwardRequest) -> bool {
        self.bind_ip == request.bind_ip && u32::from(self.bound_port) == request.bind_port
    }

    /// Number of live tasks: the accept loop, while it runs, plus one per bridge.
    pub fn live_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting and waits until the listener is closed. Connections attempted after this
    /// returns are refused. Bridges already running are not interrupted.
    pub async fn drain(&self) {
        self.drain.cancel();
        self.listener_closed.cancelled().await;
        self.tracker.close();
    }

    /// Whether the accept loop stopped on its own, after an accept error it could not recover
    /// from, rather than because the forward was drained or the session cancelled.
    pub fn has_failed(&self) -> bool {
        self.listener_closed.is_cancelled() && !self.drain.is_cancelled()
    }

    /// Whether this forward was drained and all of its bridges have finished.
    pub fn is_idle(&self) -> bool {
        self.tracker.is_closed() && self.tracker.is_empty()
    }

    /// Waits until the accept loop and every bridge have finished. Does not stop accepting by
    /// itself, so it only returns after [`drain`](Forward::drain) or session cancellation.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: ForwardContext,
    drain: CancellationToken,
    listener_closed: CancellationToken,
    tracker: TaskTracker,
) {
    let closed_guard = listener_closed.drop_guard();
    info!("Accepting connections");

    loop {
        let (tcp_stream, from) = match accept_with_backoff(|| listener.accept(), &drain).await {
            Ok(Some(accepted)) => accepted,
            Ok(None) => {
                info!("Forward drained, no longer accepting connections");
                break;
            }
            Err(error) => {
                warn!("Error accepting new incoming connection, closing forward: {error}");
                break;
            }
        };

        debug!("Accepted connection from {from}");
        let context = context.clone();
        tracker.spawn_local(async move {
            match bridge(context, tcp_stream, from).await {
                Ok(()) => {}
                Err(error) => info!("Bridge for {from} finished with error: {error}"),
            }
        }
        .in_current_span());
    }

    drop(listener);
    drop(closed_guard);
}

/// Whether an accept error concerns a single connection, or a shortage that may pass, rather than
/// the listener itself.
fn is_transient(error: &io::Error) -> bool {
    // Same values on every Unix.
    const ENFILE: i32 = 23;
    const EMFILE: i32 = 24;

    matches!(
        error.kind(),
        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset | ErrorKind::Interrupted | ErrorKind::OutOfMemory
    ) || (cfg!(unix) && matches!(error.raw_os_error(), Some(ENFILE | EMFILE)))
}

/// Calls `accept` until it succeeds, returning `Ok(None)` if `drain` is cancelled first.
///
/// Transient errors, such as running out of file descriptors, are logged and retried after a
/// growing pause. Any other error is returned.
async fn accept_with_backoff<T, F, Fut>(mut accept: F, drain: &CancellationToken) -> io::Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut backoff = ACCEPT_BACKOFF_START;

    loop {
        let result = select! {
            biased;
            _ = drain.cancelled() => return Ok(None),
            result = accept() => result,
        };

        match result {
            Ok(accepted) => return Ok(Some(accepted)),
            Err(error) if is_transient(&error) => {
                warn!("Error accepting new incoming connection, retrying in {backoff:?}: {error}");
            }
            Err(error) => return Err(error),
        }

        select! {
            biased;
            _ = drain.cancelled() => return Ok(None),
            _ = sleep(backoff) => {}
        }

        backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
    }
}

async fn bridge(context: ForwardContext, tcp_stream: TcpStream, from: SocketAddr) -> Result<()> {
    let request = ForwardedTcpipRequest::new(
        context.bind_ip,
        u32::from(context.bound_port),
        from.ip().to_string(),
        u32::from(from.port()),
    );

    let payload = to_bytes(&request).await?;
    let channel = select! {
        biased;
        _ = context.session_cancel.cancelled() => return Ok(()),
        result = context.session.open_channel(FORWARDED_TCPIP, &payload) => result?,
    };

    let stats = pump(tcp_stream, channel, &context.session_cancel).await;
    debug!(
        "Bridge for {from} ended after {} bytes sent and {} bytes received",
        stats.a_to_b, stats.b_to_a
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{io, net::Ipv4Addr, time::Duration};

    use backhaul_proto::{
        messages::{ForwardedTcpipRequest, TcpipForwardRequest},
        serialize::from_bytes,
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
        task::LocalSet,
        time::sleep,
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        session::Incoming,
        test_utils::{session_pair, spawn_channel_echo, within},
    };

    use super::{accept_with_backoff, Forward};

    const LOCALHOST: std::net::IpAddr = std::net::IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn echo(stream: &mut TcpStream, message: &[u8]) {
        stream.write_all(message).await.unwrap();
        let mut buf = vec![0u8; message.len()];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, message);
    }

    #[tokio::test]
    async fn drain_refuses_new_connections_but_keeps_bridges() {
        LocalSet::new()
            .run_until(async {
                let pair = session_pair().await;
                spawn_channel_echo(pair.client.clone());
                let cancel = CancellationToken::new();

                let request = TcpipForwardRequest::new("127.0.0.1", 0);
                let forward = Forward::open(pair.server.clone(), &request, LOCALHOST, &cancel).await.unwrap();
                let port = forward.bound_port();
                assert_ne!(port, 0);

                let mut in_flight = TcpStream::connect((LOCALHOST, port)).await.unwrap();
                within(echo(&mut in_flight, b"hello")).await;
                assert_eq!(forward.live_tasks(), 2);

                within(forward.drain()).await;
                assert!(TcpStream::connect((LOCALHOST, port)).await.is_err());

                within(echo(&mut in_flight, b"still here")).await;

                in_flight.shutdown().await.unwrap();
                let mut rest = Vec::new();
                within(in_flight.read_to_end(&mut rest)).await.unwrap();

                within(forward.wait_idle()).await;
                assert_eq!(forward.live_tasks(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn forwarded_channel_carries_addressing() {
        LocalSet::new()
            .run_until(async {
                let pair = session_pair().await;
                let cancel = CancellationToken::new();

                let request = TcpipForwardRequest::new("0.0.0.0", 8080);
                let forward = Forward::open(pair.server.clone(), &request, LOCALHOST, &cancel).await.unwrap();
                assert_ne!(u32::from(forward.bound_port()), request.bind_port);

                let tcp_stream = TcpStream::connect((LOCALHOST, forward.bound_port())).await.unwrap();
                let origin = tcp_stream.local_addr().unwrap();

                let stream = within(pair.client.accept()).await.unwrap();
                let incoming = match within(stream.identify()).await.unwrap() {
                    Incoming::Channel(channel) => channel,
                    other => panic!("Expected a channel, got {other:?}"),
                };

                assert_eq!(incoming.channel_type(), "forwarded-tcpip");
                let forwarded: ForwardedTcpipRequest = from_bytes(incoming.payload()).await.unwrap();
                let bound_port = u32::from(forward.bound_port());
                let origin_port = u32::from(origin.port());
                assert_eq!(
                    forwarded,
                    ForwardedTcpipRequest::new("0.0.0.0", bound_port, "127.0.0.1", origin_port)
                );
            })
            .await;
    }

    #[tokio::test]
    async fn session_cancellation_ends_everything() {
        LocalSet::new()
            .run_until(async {
                let pair = session_pair().await;
                spawn_channel_echo(pair.client.clone());
                let cancel = CancellationToken::new();

                let request = TcpipForwardRequest::new("127.0.0.1", 0);
                let forward = Forward::open(pair.server.clone(), &request, LOCALHOST, &cancel).await.unwrap();

                let mut connections = Vec::new();
                for i in 0..3u8 {
                    let mut stream = TcpStream::connect((LOCALHOST, forward.bound_port())).await.unwrap();
                    within(echo(&mut stream, &[i; 3])).await;
                    connections.push(stream);
                }
                assert_eq!(forward.live_tasks(), 4);

                cancel.cancel();
                within(forward.wait_idle()).await;
                assert_eq!(forward.live_tasks(), 0);

                for mut stream in connections {
                    let mut rest = Vec::new();
                    let _ = within(stream.read_to_end(&mut rest)).await;
                }
            })
            .await;
    }

    #[tokio::test]
    async fn accept_errors_are_retried() {
        let drain = CancellationToken::new();
        let mut failures = 3;

        let accepted = within(accept_with_backoff(
            || {
                let result = match failures {
                    0 => Ok("connection"),
                    _ => {
                        failures -= 1;
                        // EMFILE
                        Err(io::Error::from_raw_os_error(24))
                    }
                };
                async move { result }
            },
            &drain,
        ))
        .await;

        assert_eq!(accepted.unwrap(), Some("connection"));
        assert_eq!(failures, 0);
    }

    #[tokio::test]
    async fn listener_errors_end_the_accept_loop() {
        let drain = CancellationToken::new();
        let mut calls = 0;

        let result = within(accept_with_backoff(
            || {
                calls += 1;
                async { Err::<(), _>(io::Error::from(io::ErrorKind::InvalidInput)) }
            },
            &drain,
        ))
        .await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidInput);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn failure_is_told_apart_from_draining() {
        LocalSet::new()
            .run_until(async {
                let pair = session_pair().await;
                let cancel = CancellationToken::new();
                let request = TcpipForwardRequest::new("127.0.0.1", 0);

                let drained = Forward::open(pair.server.clone(), &request, LOCALHOST, &cancel).await.unwrap();
                assert!(!drained.has_failed());
                within(drained.drain()).await;
                assert!(!drained.has_failed());

                // The accept loop closes the listener this way when it gives up.
                let failed = Forward::open(pair.server.clone(), &request, LOCALHOST, &cancel).await.unwrap();
                failed.listener_closed.cancel();
                assert!(failed.has_failed());
            })
            .await;
    }

    #[tokio::test]
    async fn drain_stops_retrying_accept() {
        let drain = CancellationToken::new();
        let always_failing = || async { Err::<(), _>(io::Error::from(io::ErrorKind::ConnectionAborted)) };

        let drainer = async {
            sleep(Duration::from_millis(50)).await;
            drain.cancel();
        };

        let (accepted, ()) = within(async { tokio::join!(accept_with_backoff(always_failing, &drain), drainer) }).await;
        assert_eq!(accepted.unwrap(), None);
    }
}
