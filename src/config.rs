use std::net::{IpAddr, SocketAddr};

use clap::Parser;

/// EncChat relay server
#[derive(Parser, Clone, Debug)]
#[command(name = "encchat-server", version, about = "EncChat relay server")]
pub struct ServerConfig {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// Origins allowed to open HTTP and websocket connections (comma separated)
    #[arg(
        long,
        env = "CLIENT_ORIGIN",
        value_delimiter = ',',
        default_value = "http://localhost:5173,http://localhost:3000,https://chatapp-client-sage.vercel.app"
    )]
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

/// EncChat terminal client
#[derive(Parser, Clone, Debug)]
#[command(name = "encchat-client", version, about = "EncChat terminal client")]
pub struct ClientConfig {
    /// Relay server websocket base URL
    #[arg(long, env = "ENCCHAT_SERVER", default_value = "ws://localhost:3001")]
    pub server: String,

    /// Display name shown to other participants
    #[arg(long)]
    pub username: String,
}
