use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;

/// Errors that can occur at the data-link layer.
#[derive(Debug, Error)]
pub enum DataLinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame too large")]
    FrameTooLarge,
    #[error("socket closed")]
    Closed,
}

/// A bound datagram socket.
///
/// Dropping the socket closes it.
pub trait DatagramSocket: Send + Sync {
    /// Sends one datagram to `target`.
    fn send_to(
        &self,
        payload: &[u8],
        target: SocketAddr,
    ) -> impl Future<Output = Result<(), DataLinkError>> + Send;

    /// Receives one datagram into `buf`, returning `(bytes_read, source)`.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, SocketAddr), DataLinkError>> + Send;
}

/// Opens sockets on demand.
///
/// Implementors include [`UdpBinder`](crate::UdpBinder) for real networks
/// and [`LoopbackBinder`](crate::LoopbackBinder) for in-process tests.
pub trait SocketBinder: Send + Sync + 'static {
    type Socket: DatagramSocket + 'static;

    /// Binds a fresh socket on an ephemeral port for one outbound call.
    fn bind_unicast(&self) -> impl Future<Output = Result<Self::Socket, DataLinkError>> + Send;

    /// Binds `port` and joins the multicast `group`.
    fn bind_multicast(
        &self,
        group: Ipv4Addr,
        port: u16,
    ) -> impl Future<Output = Result<Self::Socket, DataLinkError>> + Send;
}
