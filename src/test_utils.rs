//! Loopback sessions, servers and services for tests.

use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use quinn::Endpoint;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ServerConfig,
    endpoint::{configure_server, generate_private_key_pem, make_client_endpoint, SERVER_NAME},
    server::run_server,
    session::{GlobalRequests, Incoming, Session},
};

pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Awaits `future`, panicking if it takes longer than [`TEST_TIMEOUT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    timeout(TEST_TIMEOUT, future).await.expect("Test operation timed out")
}

/// A server config that only listens on, and forwards from, localhost.
pub fn test_server_config() -> ServerConfig {
    ServerConfig {
        listen_address: SocketAddr::new(LOCALHOST, 0),
        forward_listen_ip: LOCALHOST,
        ..ServerConfig::default()
    }
}

fn server_endpoint(config: &ServerConfig) -> Endpoint {
    let key_pem = generate_private_key_pem().unwrap();
    Endpoint::server(configure_server(&key_pem).unwrap(), config.listen_address).unwrap()
}

/// Both ends of one session. The endpoints are kept so the connection outlives the setup.
pub struct SessionPair {
    pub client: Session,
    pub server: Session,
    _client_endpoint: Endpoint,
    _server_endpoint: Endpoint,
}

pub async fn session_pair() -> SessionPair {
    let server_endpoint = server_endpoint(&test_server_config());
    let server_address = server_endpoint.local_addr().unwrap();
    let client_endpoint = make_client_endpoint(server_address).unwrap();
    let connecting = client_endpoint.connect(server_address, SERVER_NAME).unwrap();

    let (client, server) = within(async {
        tokio::join!(Session::handshake(connecting), async {
            Session::handshake(server_endpoint.accept().await.unwrap()).await
        })
    })
    .await;

    SessionPair {
        client: client.unwrap(),
        server: server.unwrap(),
        _client_endpoint: client_endpoint,
        _server_endpoint: server_endpoint,
    }
}

pub async fn accept_global_requests(session: &Session) -> GlobalRequests {
    match session.accept().await.unwrap().identify().await.unwrap() {
        Incoming::GlobalRequests(requests) => requests,
        other => panic!("Expected a global request stream, got {other:?}"),
    }
}

/// A client session connected to a server, and the endpoint it runs on.
pub struct ClientSession {
    pub session: Session,
    _endpoint: Endpoint,
}

pub async fn connect_session(server_address: SocketAddr) -> ClientSession {
    let endpoint = make_client_endpoint(server_address).unwrap();
    let connecting = endpoint.connect(server_address, SERVER_NAME).unwrap();
    let session = within(Session::handshake(connecting)).await.unwrap();

    ClientSession {
        session,
        _endpoint: endpoint,
    }
}

/// A server that completes handshakes and accepts streams, but never reads from or answers any
/// of them.
pub fn spawn_silent_server() -> SocketAddr {
    let endpoint = server_endpoint(&test_server_config());
    let address = endpoint.local_addr().unwrap();

    tokio::task::spawn_local(async move {
        let mut held = Vec::new();
        while let Some(connecting) = endpoint.accept().await {
            let Ok(session) = Session::handshake(connecting).await else {
                continue;
            };

            while let Ok(stream) = session.accept().await {
                held.push(stream);
            }
        }
    });

    address
}

/// Accepts every channel opened on `session` and echoes back whatever it receives.
pub fn spawn_channel_echo(session: Session) -> JoinHandle<()> {
    tokio::task::spawn_local(async move {
        while let Ok(stream) = session.accept().await {
            tokio::task::spawn_local(async move {
                let channel = match stream.identify().await {
                    Ok(Incoming::Channel(channel)) => channel,
                    Ok(Incoming::GlobalRequests(requests)) => return requests.refuse(),
                    Err(_) => return,
                };

                let channel = channel.accept().await.unwrap();
                let (mut reader, mut writer) = tokio::io::split(channel);
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
                let _ = writer.shutdown().await;
            });
        }
    })
}

/// Runs a server on an ephemeral localhost port. The handle finishes once `cancel` is cancelled
/// and every session has ended.
pub fn spawn_server(config: ServerConfig, cancel: CancellationToken) -> (SocketAddr, JoinHandle<()>) {
    let endpoint = server_endpoint(&config);
    let address = endpoint.local_addr().unwrap();
    let handle = tokio::task::spawn_local(run_server(endpoint, config, cancel));
    (address, handle)
}

/// A TCP service that, on every connection, expects `request`, answers `response` and closes.
pub async fn spawn_responder(request: &'static [u8], response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::task::spawn_local(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::task::spawn_local(async move {
                let mut buf = vec![0u8; request.len()];
                stream.read_exact(&mut buf).await.unwrap();
                assert_eq!(buf, request);
                stream.write_all(response).await.unwrap();
            });
        }
    });

    address
}
