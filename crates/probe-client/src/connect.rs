//! Connection establishment: resolve, TCP connect with `TCP_NODELAY`, and
//! the optional TLS handshake.

use std::net::SocketAddr;
use std::time::Duration;

use probe_settings::ProbeSettings;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::ConnectError;
use crate::tls;

/// Per-attempt limit for TCP connect, and separately for the TLS handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Byte stream the channel event loop can drive.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Type-erased transport (plain TCP or TLS over TCP).
pub type BoxedTransport = Box<dyn Transport>;

/// An established connection.
pub struct Connected {
    /// Transport, already TLS-wrapped when requested.
    pub transport: BoxedTransport,
    /// Address actually connected to.
    pub peer: SocketAddr,
}

impl std::fmt::Debug for Connected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connected").field("peer", &self.peer).finish_non_exhaustive()
    }
}

/// Connect according to `settings`. No retries.
pub async fn connect(settings: &ProbeSettings) -> Result<Connected, ConnectError> {
    let (stream, peer) = connect_tcp(&settings.host, settings.port, CONNECT_TIMEOUT).await?;
    if !settings.ssl {
        return Ok(Connected {
            transport: Box::new(stream),
            peer,
        });
    }

    let connector = tls::insecure_connector()?;
    let name = tls::server_name(&settings.host)?;
    let stream = timeout(CONNECT_TIMEOUT, connector.connect(name, stream))
        .await
        .map_err(|_| ConnectError::Timeout {
            addr: peer,
            timeout: CONNECT_TIMEOUT,
        })?
        .map_err(|source| ConnectError::Handshake { addr: peer, source })?;
    info!(%peer, "TLS handshake complete, peer certificate not verified");

    Ok(Connected {
        transport: Box::new(stream),
        peer,
    })
}

/// Resolve `host:port` and try each address in order until one connects.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    limit: Duration,
) -> Result<(TcpStream, SocketAddr), ConnectError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|source| ConnectError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        debug!(%addr, "connecting");
        match connect_addr(addr, limit).await {
            Ok(stream) => return Ok((stream, addr)),
            Err(err) => {
                warn!(%addr, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ConnectError::NoAddresses {
        host: host.to_string(),
        port,
    }))
}

async fn connect_addr(addr: SocketAddr, limit: Duration) -> Result<TcpStream, ConnectError> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|source| ConnectError::Connect { addr, source })?;
    socket
        .set_nodelay(true)
        .map_err(|source| ConnectError::Connect { addr, source })?;

    match timeout(limit, socket.connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ConnectError::Connect { addr, source }),
        Err(_) => Err(ConnectError::Timeout {
            addr,
            timeout: limit,
        }),
    }
}
