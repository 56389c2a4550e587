use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use backhaul::config::{ClientConfig, ServerConfig, DEFAULT_LISTEN_PORT, DEFAULT_MAX_FORWARDS};
use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "backhaul")]
#[command(
    author,
    version,
    about = "Expose a local TCP service through a public server using reverse tunnels over QUIC"
)]
pub struct Cli {
    /// Log more (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept clients and forward ports on their behalf
    Serve(ServeArgs),

    /// Connect to a server and expose a local service through it
    Client(ClientArgs),

    /// Generate a private key for the server
    Keygen(KeygenArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on for clients
    #[arg(short, long, default_value_t = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_LISTEN_PORT))]
    pub listen: SocketAddr,

    /// PKCS#8 PEM private key. A new one is generated on every start if omitted
    #[arg(short = 'k', long, value_name = "PATH")]
    pub private_key: Option<PathBuf>,

    /// Maximum number of forwards a single client may hold at once
    #[arg(short, long, default_value_t = DEFAULT_MAX_FORWARDS, value_parser = parse_max_forwards)]
    pub max_forwards: usize,

    /// IP forwarded ports are opened on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub forward_ip: IpAddr,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server to connect to, as host:port
    pub server: String,

    /// Local service to expose, as host:port
    #[arg(short, long)]
    pub local: String,

    /// Port to ask the server for. 0 lets the server choose
    #[arg(short = 'p', long, default_value_t = 0)]
    pub remote_port: u16,

    /// Bind address to ask the server for
    #[arg(long, default_value = "0.0.0.0")]
    pub remote_bind_ip: String,

    /// Seconds between keep-alive requests. 0 disables them
    #[arg(long, default_value_t = 15, value_name = "SECONDS")]
    pub keepalive: u64,
}

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Where to write the key
    #[arg(short, long, value_name = "PATH")]
    pub out: PathBuf,

    /// Overwrite the file if it exists
    #[arg(short, long)]
    pub force: bool,
}

fn parse_max_forwards(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(error) => Err(error.to_string()),
    }
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen_address: args.listen,
            private_key: args.private_key,
            max_forwards: args.max_forwards,
            forward_listen_ip: args.forward_ip,
        }
    }
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        Self {
            server_address: args.server,
            remote_bind_ip: args.remote_bind_ip,
            remote_port: u32::from(args.remote_port),
            local_address: args.local,
            keepalive_interval: match args.keepalive {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use backhaul::config::{ClientConfig, ServerConfig};
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["backhaul", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else { panic!("Expected serve") };
        assert_eq!(ServerConfig::from(args), ServerConfig::default());
    }

    #[test]
    fn serve_rejects_zero_forwards() {
        assert!(Cli::try_parse_from(["backhaul", "serve", "--max-forwards", "0"]).is_err());
    }

    #[test]
    fn client_arguments() {
        let cli = Cli::try_parse_from([
            "backhaul",
            "-vv",
            "client",
            "tunnel.example.com:2222",
            "--local",
            "127.0.0.1:8080",
            "--remote-port",
            "9000",
            "--keepalive",
            "0",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let Command::Client(args) = cli.command else { panic!("Expected client") };
        let config = ClientConfig::from(args);
        assert_eq!(config.server_address, "tunnel.example.com:2222");
        assert_eq!(config.local_address, "127.0.0.1:8080");
        assert_eq!(config.remote_bind_ip, "0.0.0.0");
        assert_eq!(config.remote_port, 9000);
        assert_eq!(config.keepalive_interval, None);
    }

    #[test]
    fn client_keepalive_default() {
        let cli = Cli::try_parse_from(["backhaul", "client", "a:1", "-l", "b:2"]).unwrap();
        let Command::Client(args) = cli.command else { panic!("Expected client") };
        assert_eq!(ClientConfig::from(args).keepalive_interval, Some(Duration::from_secs(15)));
    }

    #[test]
    fn client_requires_local_service() {
        assert!(Cli::try_parse_from(["backhaul", "client", "a:1"]).is_err());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["backhaul", "-q", "-v", "keygen", "-o", "key.pem"]).is_err());
    }
}
