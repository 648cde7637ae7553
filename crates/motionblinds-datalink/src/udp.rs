use crate::{DataLinkError, DatagramSocket, SocketBinder};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
}

impl UdpDatagramSocket {
    pub fn local_addr(&self) -> Result<SocketAddr, DataLinkError> {
        self.socket.local_addr().map_err(DataLinkError::Io)
    }
}

impl DatagramSocket for UdpDatagramSocket {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<(), DataLinkError> {
        let sent = self.socket.send_to(payload, target).await?;
        if sent != payload.len() {
            return Err(DataLinkError::FrameTooLarge);
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), DataLinkError> {
        Ok(self.socket.recv_from(buf).await?)
    }
}

/// Binds real UDP sockets through tokio.
#[derive(Debug, Clone, Copy)]
pub struct UdpBinder {
    interface: Ipv4Addr,
}

impl UdpBinder {
    pub fn new() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Uses `interface` for unicast binds and multicast membership.
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = interface;
        self
    }
}

impl Default for UdpBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketBinder for UdpBinder {
    type Socket = UdpDatagramSocket;

    async fn bind_unicast(&self) -> Result<UdpDatagramSocket, DataLinkError> {
        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(self.interface), 0)).await?;
        socket.set_broadcast(true)?;
        Ok(UdpDatagramSocket { socket })
    }

    async fn bind_multicast(
        &self,
        group: Ipv4Addr,
        port: u16,
    ) -> Result<UdpDatagramSocket, DataLinkError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))?;
        socket.join_multicast_v4(&group, &self.interface)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        Ok(UdpDatagramSocket { socket })
    }
}
