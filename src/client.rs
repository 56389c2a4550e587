//! The client end of a tunnel: connects to the server, asks it to forward a port, and bridges
//! every forwarded connection to a local service.

use std::{rc::Rc, time::Duration};

use backhaul_proto::{
    messages::{ForwardedTcpipRequest, OpenFailureReason, FORWARDED_TCPIP},
    serialize::from_bytes,
};
use quinn::ConnectionError;
use tokio::{
    net::{lookup_host, TcpStream},
    select,
    sync::watch,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, trace, warn};

use crate::{
    config::ClientConfig,
    endpoint::{make_client_endpoint, SERVER_NAME},
    error::{Result, TunnelError},
    pump::pump,
    session::{GlobalRequester, Incoming, IncomingChannel, IncomingStream, Session},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Disconnected,
    Handshaking,
    /// The server accepted the forward and listens on `bound_port`.
    Forwarding { bound_port: u32 },
    Closed,
}

/// Runs one client session from start to end. There is no reconnection: once [`Connector::run`]
/// returns, the connector stays [`ConnectorState::Closed`].
#[derive(Debug)]
pub struct Connector {
    config: ClientConfig,
    state: watch::Sender<ConnectorState>,
}

impl Connector {
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectorState::Disconnected);
        Self { config, state }
    }

    pub fn state(&self) -> ConnectorState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectorState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectorState) {
        debug!("Connector state: {state:?}");
        self.state.send_replace(state);
    }

    /// Connects, sets up the forward, and serves forwarded connections until the session ends or
    /// `cancel` is cancelled. Cancellation is a clean exit; the session ending any other way is
    /// returned as an error.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let result = self.run_session(cancel).await;
        self.set_state(ConnectorState::Closed);
        result
    }

    async fn run_session(&self, cancel: &CancellationToken) -> Result<()> {
        let server_address = lookup_host(&self.config.server_address)
            .await?
            .next()
            .ok_or_else(|| TunnelError::Protocol(format!("{} resolved to no addresses", self.config.server_address)))?;

        self.set_state(ConnectorState::Handshaking);
        info!("Connecting to {server_address}");
        let endpoint = make_client_endpoint(server_address)?;
        let connecting = endpoint.connect(server_address, SERVER_NAME)?;

        let session = select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            result = Session::handshake(connecting) => result?,
        };

        let setup = async {
            let mut requester = session.open_global_requests().await?;
            let bound_port = requester
                .tcpip_forward(&self.config.remote_bind_ip, self.config.remote_port)
                .await?;
            Ok::<_, TunnelError>((requester, bound_port))
        };

        let (requester, bound_port) = select! {
            biased;
            _ = cancel.cancelled() => {
                session.close("Client is shutting down");
                return Ok(());
            }
            result = setup => result?,
        };

        info!("Server is forwarding port {bound_port} to {}", self.config.local_address);
        self.set_state(ConnectorState::Forwarding { bound_port });

        let session_cancel = cancel.child_token();
        let tasks = TaskTracker::new();
        tasks.spawn_local(send_keepalives(requester, self.config.keepalive_interval, session_cancel.clone()));

        let local_address: Rc<str> = Rc::from(self.config.local_address.as_str());
        let result = loop {
            let stream = select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                v = session.accept() => v,
            };

            match stream {
                Ok(stream) => {
                    let local_address = Rc::clone(&local_address);
                    let session_cancel = session_cancel.clone();
                    tasks.spawn_local(async move {
                        if let Err(error) = handle_stream(stream, &local_address, bound_port, &session_cancel).await {
                            info!("Forwarded connection finished with error: {error}");
                        }
                    });
                }
                Err(TunnelError::Connection(ConnectionError::LocallyClosed)) => break Ok(()),
                Err(TunnelError::Connection(error)) => {
                    warn!("The connection closed: {error}");
                    break Err(error.into());
                }
                Err(error) => break Err(error),
            }
        };

        session_cancel.cancel();
        session.close("Client is shutting down");
        tasks.close();
        tasks.wait().await;
        endpoint.wait_idle().await;

        result
    }
}

async fn send_keepalives(mut requester: GlobalRequester, interval: Option<Duration>, cancel: CancellationToken) {
    let interval = match interval {
        Some(interval) => interval,
        None => {
            cancel.cancelled().await;
            return;
        }
    };

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match requester.keepalive().await {
            Ok(true) => trace!("Keep-alive acknowledged"),
            Ok(false) => debug!("Server refused keep-alive request"),
            Err(error) => {
                debug!("Keep-alive failed, no longer sending them: {error}");
                break;
            }
        }
    }
}

async fn handle_stream(
    stream: IncomingStream,
    local_address: &str,
    bound_port: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    match stream.identify().await {
        Ok(Incoming::Channel(channel)) => handle_forwarded_channel(channel, local_address, bound_port, cancel).await,
        Ok(Incoming::GlobalRequests(requests)) => {
            warn!("Refusing global request stream opened by the server");
            requests.refuse();
            Ok(())
        }
        Err(error) => {
            debug!("Discarding stream with unreadable header: {error}");
            Ok(())
        }
    }
}

async fn handle_forwarded_channel(
    channel: IncomingChannel,
    local_address: &str,
    bound_port: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    if channel.channel_type() != FORWARDED_TCPIP {
        info!("Rejecting channel of unknown type {:?}", channel.channel_type());
        return channel
            .reject(OpenFailureReason::UnknownChannelType, "Unknown channel type")
            .await;
    }

    let request: ForwardedTcpipRequest = match from_bytes(channel.payload()).await {
        Ok(request) => request,
        Err(error) => {
            warn!("Rejecting forwarded channel with malformed payload: {error}");
            return channel
                .reject(OpenFailureReason::ConnectFailed, "Malformed forwarded-tcpip payload")
                .await;
        }
    };

    if request.forward_port != bound_port {
        warn!("Rejecting forwarded channel for port {}, which was never forwarded", request.forward_port);
        return channel
            .reject(OpenFailureReason::AdministrativelyProhibited, "Port was not forwarded")
            .await;
    }

    info!(
        "Forwarded connection from {}:{} to {local_address}",
        request.origin_ip, request.origin_port
    );

    let tcp_stream = match TcpStream::connect(local_address).await {
        Ok(tcp_stream) => tcp_stream,
        Err(error) => {
            warn!("Couldn't connect to {local_address}: {error}");
            return channel.reject(OpenFailureReason::ConnectFailed, &error.to_string()).await;
        }
    };

    let channel = channel.accept().await?;
    let stats = pump(tcp_stream, channel, cancel).await;
    debug!(
        "Forwarded connection ended after {} bytes sent and {} bytes received",
        stats.a_to_b, stats.b_to_a
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, rc::Rc, time::Duration};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
        task::LocalSet,
    };
    use tokio_util::sync::CancellationToken;

    use crate::{
        config::ClientConfig,
        error::TunnelError,
        test_utils::{spawn_responder, spawn_server, spawn_silent_server, test_server_config, within},
    };

    use super::{Connector, ConnectorState};

    async fn wait_until_forwarding(connector: &Connector) -> u16 {
        let mut state = connector.watch_state();
        let state = within(state.wait_for(|s| matches!(s, ConnectorState::Forwarding { .. } | ConnectorState::Closed)))
            .await
            .unwrap();

        match *state {
            ConnectorState::Forwarding { bound_port } => bound_port as u16,
            other => panic!("Connector never started forwarding, ended in {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_pong_end_to_end() {
        LocalSet::new()
            .run_until(async {
                let cancel = CancellationToken::new();
                let (server_address, server_handle) = spawn_server(test_server_config(), cancel.clone());
                let service_address = spawn_responder(b"ping", b"pong").await;

                let mut config = ClientConfig::new(server_address.to_string(), service_address.to_string());
                config.keepalive_interval = Some(Duration::from_millis(20));
                let connector = Rc::new(Connector::new(config));
                assert_eq!(connector.state(), ConnectorState::Disconnected);

                let client_handle = {
                    let connector = Rc::clone(&connector);
                    let cancel = cancel.clone();
                    tokio::task::spawn_local(async move { connector.run(&cancel).await })
                };

                let port = wait_until_forwarding(&connector).await;
                for _ in 0..2 {
                    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
                    stream.write_all(b"ping").await.unwrap();

                    let mut reply = Vec::new();
                    within(stream.read_to_end(&mut reply)).await.unwrap();
                    assert_eq!(reply, b"pong");
                }

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert!(matches!(connector.state(), ConnectorState::Forwarding { .. }));

                cancel.cancel();
                within(client_handle).await.unwrap().unwrap();
                assert_eq!(connector.state(), ConnectorState::Closed);
                within(server_handle).await.unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn unreachable_local_service_only_drops_that_connection() {
        LocalSet::new()
            .run_until(async {
                let cancel = CancellationToken::new();
                let (server_address, _server_handle) = spawn_server(test_server_config(), cancel.clone());

                let closed_port = {
                    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
                    listener.local_addr().unwrap()
                };

                let config = ClientConfig::new(server_address.to_string(), closed_port.to_string());
                let connector = Rc::new(Connector::new(config));
                let client_handle = {
                    let connector = Rc::clone(&connector);
                    let cancel = cancel.clone();
                    tokio::task::spawn_local(async move { connector.run(&cancel).await })
                };

                let port = wait_until_forwarding(&connector).await;
                let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
                let mut buf = Vec::new();
                let _ = within(stream.read_to_end(&mut buf)).await;
                assert!(buf.is_empty());

                assert!(matches!(connector.state(), ConnectorState::Forwarding { .. }));
                cancel.cancel();
                within(client_handle).await.unwrap().unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn cancel_while_server_never_answers_the_forward_request() {
        LocalSet::new()
            .run_until(async {
                let server_address = spawn_silent_server();
                let connector = Rc::new(Connector::new(ClientConfig::new(server_address.to_string(), "127.0.0.1:1")));
                let cancel = CancellationToken::new();
                let client_handle = {
                    let connector = Rc::clone(&connector);
                    let cancel = cancel.clone();
                    tokio::task::spawn_local(async move { connector.run(&cancel).await })
                };

                let mut state = connector.watch_state();
                within(state.wait_for(|s| *s == ConnectorState::Handshaking)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(200)).await;
                assert_eq!(connector.state(), ConnectorState::Handshaking);

                cancel.cancel();
                within(client_handle).await.unwrap().unwrap();
                assert_eq!(connector.state(), ConnectorState::Closed);
            })
            .await;
    }

    #[tokio::test]
    async fn unresolvable_server_closes_with_error() {
        let connector = Connector::new(ClientConfig::new("definitely not an address", "127.0.0.1:1"));
        let error = connector.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, TunnelError::Io(_)));
        assert_eq!(connector.state(), ConnectorState::Closed);
    }

    #[tokio::test]
    async fn server_shutdown_is_reported_to_the_caller() {
        LocalSet::new()
            .run_until(async {
                let server_cancel = CancellationToken::new();
                let (server_address, server_handle) = spawn_server(test_server_config(), server_cancel.clone());

                let connector = Rc::new(Connector::new(ClientConfig::new(server_address.to_string(), "127.0.0.1:1")));
                let client_handle = {
                    let connector = Rc::clone(&connector);
                    tokio::task::spawn_local(async move { connector.run(&CancellationToken::new()).await })
                };

                wait_until_forwarding(&connector).await;
                server_cancel.cancel();
                within(server_handle).await.unwrap();

                let error = within(client_handle).await.unwrap().unwrap_err();
                assert!(matches!(error, TunnelError::Connection(_)));
                assert_eq!(connector.state(), ConnectorState::Closed);
            })
            .await;
    }
}
