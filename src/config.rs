//! Runtime configuration for both ends of a tunnel.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_LISTEN_PORT: u16 = 2222;
pub const DEFAULT_MAX_FORWARDS: usize = 2;
pub const DEFAULT_CLIENT_KEEPALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the QUIC endpoint listens on.
    pub listen_address: SocketAddr,

    /// PKCS#8 PEM private key. When absent, a new key is generated on every start.
    pub private_key: Option<PathBuf>,

    /// How many forwards a single session may hold at once. Always at least 1.
    pub max_forwards: usize,

    /// IP every forward listener binds to, regardless of what the client asked for.
    pub forward_listen_ip: IpAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_LISTEN_PORT),
            private_key: None,
            max_forwards: DEFAULT_MAX_FORWARDS,
            forward_listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// The server, as `host:port`. Resolved when connecting.
    pub server_address: String,

    /// Bind IP sent in the forward request. The server reports it back in every forwarded channel.
    pub remote_bind_ip: String,

    /// Requested remote port, 0 letting the server choose.
    pub remote_port: u32,

    /// The local service forwarded connections are bridged to, as `host:port`.
    pub local_address: String,

    /// How often to send keep-alive requests. `None` disables them.
    pub keepalive_interval: Option<Duration>,
}

impl ClientConfig {
    pub fn new(server_address: impl Into<String>, local_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            remote_bind_ip: Ipv4Addr::UNSPECIFIED.to_string(),
            remote_port: 0,
            local_address: local_address.into(),
            keepalive_interval: Some(DEFAULT_CLIENT_KEEPALIVE),
        }
    }
}
