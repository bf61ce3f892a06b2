use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use clap::{Args, Parser, Subcommand};

use crate::{
    config::{ServerConfig, parse_port},
    error::ConfigError,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server until Ctrl-C.
    Server(ServerArgs),
    /// Connect to a server and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Interface to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value = "5000", value_parser = parse_port)]
    pub port: u16,

    /// Seconds to wait for sessions to finish during shutdown.
    #[arg(long, default_value_t = 5)]
    pub grace_secs: u64,

    /// Per-recipient write timeout in milliseconds. Unbounded when omitted.
    #[arg(long)]
    pub send_timeout_ms: Option<u64>,
}

impl ServerArgs {
    pub fn to_config(&self) -> Result<ServerConfig, ConfigError> {
        ServerConfig {
            bind: self.bind,
            ..ServerConfig::default()
        }
        .with_port(self.port)
        .with_grace_period(Duration::from_secs(self.grace_secs))?
        .with_send_timeout(self.send_timeout_ms.map(Duration::from_millis))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name announced to the other participants.
    #[arg(long)]
    pub name: String,

    /// Address of the server to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,
}
