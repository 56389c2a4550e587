use std::io;

use backhaul_proto::messages::OpenFailureReason;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("Could not start connection: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Key material error: {0}")]
    KeyMaterial(String),

    #[error("Channel rejected ({reason}): {description}")]
    ChannelRejected { reason: OpenFailureReason, description: String },

    #[error("Server refused to forward {bind_ip}:{bind_port}")]
    ForwardRejected { bind_ip: String, bind_port: u32 },

    #[error("Protocol violation: {0}")]
    Protocol(String),
}

pub type Result<T, E = TunnelError> = std::result::Result<T, E>;
