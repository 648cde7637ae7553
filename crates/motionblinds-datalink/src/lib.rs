pub mod loopback;
pub mod multicast;
pub mod traits;
pub mod udp;
pub mod unicast;

pub use loopback::{
    loopback, LoopbackBinder, LoopbackNetwork, LoopbackSocket, MulticastAnnouncer, OutboundDatagram,
};
pub use multicast::{create_multicast_listener, Datagram, MulticastListener, ReconnectBackoff};
pub use traits::{DataLinkError, DatagramSocket, SocketBinder};
pub use udp::{UdpBinder, UdpDatagramSocket};
pub use unicast::{exchange, Collect};

/// Largest datagram the transports will receive.
pub const MAX_DATAGRAM_LEN: usize = 65_535;
