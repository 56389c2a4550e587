//! Handles the global requests of one session and keeps track of its forwards.

use std::net::IpAddr;

use backhaul_proto::{
    messages::{GlobalRequestKind, TcpipForwardRequest, TcpipForwardResponse},
    serialize::{from_bytes, to_bytes},
};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    config::ServerConfig,
    error::Result,
    session::{GlobalRequest, GlobalRequests, Session},
};

use super::forward::Forward;

/// The per-session forward registry, and the single consumer of that session's global requests.
#[derive(Debug)]
pub struct Dispatcher {
    session: Session,
    cancel: CancellationToken,
    max_forwards: usize,
    forward_listen_ip: IpAddr,
    forwards: Vec<Forward>,
    retired: Vec<Forward>,
}

impl Dispatcher {
    pub fn new(session: Session, cancel: CancellationToken, config: &ServerConfig) -> Self {
        Self {
            session,
            cancel,
            max_forwards: config.max_forwards,
            forward_listen_ip: config.forward_listen_ip,
            forwards: Vec::new(),
            retired: Vec::new(),
        }
    }

    /// The forwards currently accepting connections.
    pub fn forwards(&self) -> &[Forward] {
        &self.forwards
    }

    /// Handles requests one at a time, in order, until the peer closes the stream or the session
    /// is cancelled. Forwards stay up after this returns; see [`Dispatcher::shutdown`].
    ///
    /// Only errors writing replies or reading the stream itself are returned. Anything wrong with
    /// a single request is answered with a failure reply.
    pub async fn run(&mut self, mut requests: GlobalRequests) -> Result<()> {
        loop {
            let maybe_request = select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = requests.next() => result?,
            };

            match maybe_request {
                Some(request) => self.dispatch(request).await?,
                None => {
                    debug!("Peer closed the global request stream");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn dispatch(&mut self, request: GlobalRequest<'_>) -> Result<()> {
        let kind = request.kind().to_owned();

        match GlobalRequestKind::parse(&kind) {
            GlobalRequestKind::TcpipForward => self.handle_tcpip_forward(request).await,
            GlobalRequestKind::CancelTcpipForward => self.handle_cancel_tcpip_forward(request).await,
            GlobalRequestKind::Keepalive => {
                trace!("Answering keep-alive request {kind}");
                request.accept(&[]).await
            }
            GlobalRequestKind::Unknown(kind) => {
                info!("Rejecting unknown global request type {kind:?}");
                request.reject().await
            }
        }
    }

    async fn handle_tcpip_forward(&mut self, request: GlobalRequest<'_>) -> Result<()> {
        let forward_request: TcpipForwardRequest = match from_bytes(request.payload()).await {
            Ok(r) => r,
            Err(error) => {
                warn!("Rejecting malformed forward request: {error}");
                return request.reject().await;
            }
        };

        self.release_failed_forwards().await;
        if self.forwards.len() >= self.max_forwards {
            warn!(
                "Rejecting forward request for {}:{}, session already has {} forwards",
                forward_request.bind_ip,
                forward_request.bind_port,
                self.forwards.len()
            );
            return request.reject().await;
        }

        let session = self.session.clone();
        let forward = match Forward::open(session, &forward_request, self.forward_listen_ip, &self.cancel).await {
            Ok(forward) => forward,
            Err(error) => {
                warn!("Couldn't bind listener for forward request: {error}");
                return request.reject().await;
            }
        };

        let bound_port = forward.bound_port();
        info!(
            "Forwarding port {bound_port} (requested {}:{})",
            forward_request.bind_ip, forward_request.bind_port
        );

        let response = to_bytes(&TcpipForwardResponse::new(u32::from(bound_port))).await?;
        self.forwards.push(forward);
        request.accept(&response).await
    }

    async fn handle_cancel_tcpip_forward(&mut self, request: GlobalRequest<'_>) -> Result<()> {
        let cancel_request: TcpipForwardRequest = match from_bytes(request.payload()).await {
            Ok(r) => r,
            Err(error) => {
                warn!("Rejecting malformed cancel forward request: {error}");
                return request.reject().await;
            }
        };

        let index = match self.forwards.iter().position(|f| f.matches(&cancel_request)) {
            Some(index) => index,
            None => {
                info!(
                    "Rejecting cancel request for unknown forward {}:{}",
                    cancel_request.bind_ip, cancel_request.bind_port
                );
                return request.reject().await;
            }
        };

        let forward = self.forwards.remove(index);
        forward.drain().await;
        info!("Stopped forwarding port {}", forward.bound_port());
        self.retired.retain(|retired| !retired.is_idle());
        self.retired.push(forward);

        request.accept(&[]).await
    }

    /// Moves forwards that stopped accepting on their own out of the registry, freeing their slots.
    async fn release_failed_forwards(&mut self) {
        let (failed, live): (Vec<_>, Vec<_>) = self.forwards.drain(..).partition(Forward::has_failed);
        self.forwards = live;

        for forward in failed {
            warn!("Forward on port {} stopped accepting, releasing its slot", forward.bound_port());
            forward.drain().await;
            self.retired.push(forward);
        }
    }

    /// Drains every forward and waits until all of their bridges have finished.
    ///
    /// Bridges end on their own once either of their ends closes. Cancel the session first to
    /// also cut them short.
    pub async fn shutdown(&mut self) {
        for forward in &self.forwards {
            forward.drain().await;
        }

        self.retired.append(&mut self.forwards);
        for forward in &self.retired {
            forward.wait_idle().await;
        }

        debug!("All forwards of the session are idle");
        self.retired.clear();
    }
}
