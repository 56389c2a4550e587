use std::{cell::Cell, rc::Rc};

use backhaul_proto::messages::OpenFailureReason;
use quinn::{Connecting, ConnectionError, Endpoint, VarInt};
use tokio::select;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::ServerConfig,
    endpoint::make_server_endpoint,
    error::{Result, TunnelError},
    session::{Incoming, IncomingChannel, IncomingStream, Session, CLOSE_CODE_SHUTDOWN},
};

mod dispatcher;
mod forward;

pub use dispatcher::Dispatcher;
pub use forward::Forward;

/// Binds the server's endpoint and serves sessions on it until `cancel` is cancelled.
pub async fn serve(config: ServerConfig, cancel: CancellationToken) -> Result<()> {
    let endpoint = make_server_endpoint(&config)?;
    run_server(endpoint, config, cancel).await;
    Ok(())
}

/// Accepts connections on `endpoint`, handling each as a separate session, until `cancel` is
/// cancelled or the endpoint is closed. Returns once every session has ended.
pub async fn run_server(endpoint: Endpoint, config: ServerConfig, cancel: CancellationToken) {
    match endpoint.local_addr() {
        Ok(address) => info!("Starting server on {address}"),
        Err(error) => warn!("Starting server on unknown address: {error}"),
    }

    let config = Rc::new(config);
    let sessions = TaskTracker::new();

    loop {
        let incoming_connection = select! {
            biased;
            _ = cancel.cancelled() => break,
            v = endpoint.accept() => v,
        };

        let incoming_connection = match incoming_connection {
            Some(c) => c,
            None => break,
        };

        let span = info_span!("session", remote = %incoming_connection.remote_address());
        let config = Rc::clone(&config);
        let session_cancel = cancel.child_token();
        sessions.spawn_local(handle_connection(incoming_connection, config, session_cancel).instrument(span));
    }

    info!("Server is shutting down, waiting for {} sessions", sessions.len());
    endpoint.close(VarInt::from_u32(CLOSE_CODE_SHUTDOWN), b"Server is shutting down");
    sessions.close();
    sessions.wait().await;
    endpoint.wait_idle().await;
    info!("Server closed");
}

/// What every stream task of one session shares.
#[derive(Debug, Clone)]
struct SessionContext {
    session: Session,
    config: Rc<ServerConfig>,
    cancel: CancellationToken,
    has_dispatcher: Rc<Cell<bool>>,
}

async fn handle_connection(incoming_connection: Connecting, config: Rc<ServerConfig>, cancel: CancellationToken) {
    let session = match Session::handshake(incoming_connection).await {
        Ok(session) => session,
        Err(error) => {
            info!("Failed to accept incoming connection: {error}");
            return;
        }
    };

    info!("Session established with {}", session.remote_address());
    let context = SessionContext {
        session: session.clone(),
        config,
        cancel: cancel.clone(),
        has_dispatcher: Rc::new(Cell::new(false)),
    };
    let tasks = TaskTracker::new();

    loop {
        let stream = select! {
            biased;
            _ = cancel.cancelled() => break,
            v = session.accept() => v,
        };

        match stream {
            Ok(stream) => {
                tasks.spawn_local(handle_stream(stream, context.clone()).in_current_span());
            }
            Err(TunnelError::Connection(error)) => {
                match error {
                    ConnectionError::LocallyClosed => {}
                    ConnectionError::ApplicationClosed(_) => info!("The client closed the connection"),
                    error => info!("The connection closed unexpectedly: {error}"),
                }
                break;
            }
            Err(error) => {
                info!("Failed to accept stream, closing session: {error}");
                break;
            }
        }
    }

    cancel.cancel();
    session.close("Session closed");
    tasks.close();
    tasks.wait().await;
    info!("Session ended");
}

async fn handle_stream(stream: IncomingStream, context: SessionContext) {
    let requests = match stream.identify().await {
        Ok(Incoming::GlobalRequests(requests)) => requests,
        Ok(Incoming::Channel(channel)) => return reject_channel(channel).await,
        Err(error) => {
            debug!("Discarding stream with unreadable header: {error}");
            return;
        }
    };

    if context.has_dispatcher.replace(true) {
        warn!("Refusing a second global request stream");
        requests.refuse();
        return;
    }

    let SessionContext { session, config, cancel, .. } = context;

    let mut dispatcher = Dispatcher::new(session, cancel.clone(), &config);
    if let Err(error) = dispatcher.run(requests).await {
        warn!("Global request stream failed, closing session: {error}");
        cancel.cancel();
    }

    cancel.cancelled().await;
    dispatcher.shutdown().await;
}

async fn reject_channel(channel: IncomingChannel) {
    info!("Rejecting channel of type {:?} opened by the client", channel.channel_type());
    if let Err(error) = channel
        .reject(OpenFailureReason::UnknownChannelType, "Clients may not open channels")
        .await
    {
        debug!("Failed to reject channel: {error}");
    }
}
