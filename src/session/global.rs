use std::io::ErrorKind;

use backhaul_proto::{
    messages::{
        GlobalReplyFrame, GlobalReplyFrameRef, GlobalRequestFrame, GlobalRequestFrameRef, TcpipForwardRequest,
        TcpipForwardResponse, CANCEL_TCPIP_FORWARD, KEEPALIVE_REQUEST, TCPIP_FORWARD,
    },
    serialize::{from_bytes, to_bytes, ByteRead, ByteWrite},
};
use quinn::{RecvStream, SendStream, VarInt};

use crate::error::{Result, TunnelError};

use super::RESET_CODE_REFUSED;

/// The sending end of a session's global-request stream.
///
/// Requests take `&mut self`, so only one can be in flight at a time and replies always match the
/// request that was just sent.
#[derive(Debug)]
pub struct GlobalRequester {
    send_stream: SendStream,
    recv_stream: RecvStream,
}

impl GlobalRequester {
    pub(super) fn new(send_stream: SendStream, recv_stream: RecvStream) -> Self {
        Self {
            send_stream,
            recv_stream,
        }
    }

    pub async fn request(&mut self, kind: &str, payload: &[u8]) -> Result<GlobalReplyFrame> {
        GlobalRequestFrameRef::new(kind, payload).write(&mut self.send_stream).await?;
        Ok(GlobalReplyFrame::read(&mut self.recv_stream).await?)
    }

    /// Asks the server to listen on `bind_ip:bind_port` and forward whatever connects. Returns
    /// the port the server actually bound.
    pub async fn tcpip_forward(&mut self, bind_ip: &str, bind_port: u32) -> Result<u32> {
        let request = TcpipForwardRequest::new(bind_ip, bind_port);
        let reply = self.request(TCPIP_FORWARD, &to_bytes(&request).await?).await?;

        if !reply.success {
            return Err(TunnelError::ForwardRejected {
                bind_ip: request.bind_ip,
                bind_port,
            });
        }

        let response: TcpipForwardResponse = from_bytes(&reply.payload)
            .await
            .map_err(|error| TunnelError::Protocol(format!("Malformed forward response: {error}")))?;

        Ok(response.bound_port)
    }

    /// Asks the server to stop a forward previously started with [`tcpip_forward`]. `bound_port`
    /// is the port the server reported back. Returns whether the server had such a forward.
    ///
    /// [`tcpip_forward`]: GlobalRequester::tcpip_forward
    pub async fn cancel_tcpip_forward(&mut self, bind_ip: &str, bound_port: u32) -> Result<bool> {
        let payload = to_bytes(&TcpipForwardRequest::new(bind_ip, bound_port)).await?;
        Ok(self.request(CANCEL_TCPIP_FORWARD, &payload).await?.success)
    }

    pub async fn keepalive(&mut self) -> Result<bool> {
        Ok(self.request(KEEPALIVE_REQUEST, &[]).await?.success)
    }
}

/// The receiving end of a session's global-request stream.
#[derive(Debug)]
pub struct GlobalRequests {
    send_stream: SendStream,
    recv_stream: RecvStream,
}

impl GlobalRequests {
    pub(super) fn new(send_stream: SendStream, recv_stream: RecvStream) -> Self {
        Self {
            send_stream,
            recv_stream,
        }
    }

    /// Reads the next request. `Ok(None)` means the peer closed the stream.
    ///
    /// The returned request borrows this stream, so the next one can't be read before this one
    /// is answered or dropped. Every request must be answered, otherwise the peer can't match
    /// later replies to their requests.
    pub async fn next(&mut self) -> Result<Option<GlobalRequest<'_>>> {
        let frame = match GlobalRequestFrame::read(&mut self.recv_stream).await {
            Ok(frame) => frame,
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        Ok(Some(GlobalRequest {
            kind: frame.kind,
            payload: frame.payload,
            send_stream: &mut self.send_stream,
        }))
    }

    /// Rejects the whole stream. Used when a peer opens more than one.
    pub fn refuse(mut self) {
        let _ = self.send_stream.reset(VarInt::from_u32(RESET_CODE_REFUSED));
        let _ = self.recv_stream.stop(VarInt::from_u32(RESET_CODE_REFUSED));
    }
}

#[derive(Debug)]
pub struct GlobalRequest<'a> {
    kind: String,
    payload: Vec<u8>,
    send_stream: &'a mut SendStream,
}

impl<'a> GlobalRequest<'a> {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn reply(self, success: bool, payload: &[u8]) -> Result<()> {
        GlobalReplyFrameRef::new(success, payload).write(self.send_stream).await?;
        Ok(())
    }

    pub async fn accept(self, payload: &[u8]) -> Result<()> {
        self.reply(true, payload).await
    }

    pub async fn reject(self) -> Result<()> {
        self.reply(false, &[]).await
    }
}
