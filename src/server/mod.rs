mod connection;
mod registry;

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;

pub use connection::{Connection, LineRead};
pub use registry::{ConnectionRegistry, DeliveryOutcome};

pub type ConnectionId = u64;

const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum ServerError {
    Bind { address: String, source: io::Error },
    LocalAddr { source: io::Error },
    ConfigureAcceptedStream { source: io::Error },
    StreamClone { source: io::Error },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { address, source } => {
                write!(f, "failed to bind TCP server on {address}: {source}")
            }
            Self::LocalAddr { source } => {
                write!(f, "failed to read bound TCP server address: {source}")
            }
            Self::ConfigureAcceptedStream { source } => {
                write!(f, "failed to configure accepted TCP stream: {source}")
            }
            Self::StreamClone { source } => {
                write!(f, "failed to clone accepted TCP stream for full duplex IO: {source}")
            }
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { source, .. }
            | Self::LocalAddr { source }
            | Self::ConfigureAcceptedStream { source }
            | Self::StreamClone { source } => Some(source),
        }
    }
}

/// Blocking listener shared by every acceptor thread.
pub struct TcpServer {
    listener: Arc<TcpListener>,
    local_addr: SocketAddr,
}

impl TcpServer {
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address).map_err(|source| ServerError::Bind {
            address,
            source,
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::LocalAddr { source })?;

        Ok(Self {
            listener: Arc::new(listener),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn listener(&self) -> Arc<TcpListener> {
        Arc::clone(&self.listener)
    }

    /// Address a local client can connect to; wildcard binds map to loopback.
    pub fn wake_addr(&self) -> SocketAddr {
        let ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        SocketAddr::new(ip, self.local_addr.port())
    }

    /// Unblocks up to `count` threads parked in `accept` by connecting to
    /// the listener and hanging up. Returns how many connects succeeded.
    pub fn wake_acceptors(&self, count: usize) -> usize {
        let address = self.wake_addr();
        (0..count)
            .filter(|_| TcpStream::connect_timeout(&address, WAKE_CONNECT_TIMEOUT).is_ok())
            .count()
    }
}
