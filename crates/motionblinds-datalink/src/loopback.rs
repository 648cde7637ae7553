//! In-process transport for tests and simulators.
//!
//! [`loopback`] returns a [`LoopbackBinder`] to hand to the client and a
//! [`LoopbackNetwork`] playing the bridge side: it sees every datagram the
//! client sends, can reply to the socket that sent it, and can publish
//! datagrams to every socket bound on the multicast group.

use crate::{DataLinkError, DatagramSocket, SocketBinder};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug)]
enum Inbound {
    Datagram(Vec<u8>, SocketAddr),
    Fault,
}

#[derive(Debug)]
struct Shared {
    outbound: mpsc::UnboundedSender<OutboundDatagram>,
    multicast: Mutex<Vec<mpsc::UnboundedSender<Inbound>>>,
    multicast_binds: AtomicUsize,
    next_port: AtomicU16,
}

impl Shared {
    fn local_addr(&self) -> SocketAddr {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    fn broadcast(&self, make: impl Fn() -> Inbound) -> usize {
        let mut sockets = self
            .multicast
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sockets.retain(|tx| tx.send(make()).is_ok());
        sockets.len()
    }
}

/// Creates a connected binder/network pair.
pub fn loopback() -> (LoopbackBinder, LoopbackNetwork) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        outbound: tx,
        multicast: Mutex::new(Vec::new()),
        multicast_binds: AtomicUsize::new(0),
        next_port: AtomicU16::new(40_000),
    });
    (
        LoopbackBinder {
            shared: shared.clone(),
        },
        LoopbackNetwork {
            outbound: rx,
            shared,
        },
    )
}

/// A datagram sent by a loopback socket.
#[derive(Debug, Clone)]
pub struct OutboundDatagram {
    pub payload: Vec<u8>,
    pub target: SocketAddr,
    /// Local address of the sending socket.
    pub source: SocketAddr,
    reply_to: mpsc::UnboundedSender<Inbound>,
}

impl OutboundDatagram {
    /// Delivers `payload` to the sending socket as if it came from `from`.
    ///
    /// Returns `false` when that socket has already been closed.
    pub fn reply(&self, payload: &[u8], from: SocketAddr) -> bool {
        self.reply_to
            .send(Inbound::Datagram(payload.to_vec(), from))
            .is_ok()
    }
}

#[derive(Debug)]
pub struct LoopbackSocket {
    local: SocketAddr,
    outbound: mpsc::UnboundedSender<OutboundDatagram>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

impl LoopbackSocket {
    fn new(shared: &Shared) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            local: shared.local_addr(),
            outbound: shared.outbound.clone(),
            inbox_tx,
            inbox: tokio::sync::Mutex::new(inbox_rx),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

impl DatagramSocket for LoopbackSocket {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> Result<(), DataLinkError> {
        self.outbound
            .send(OutboundDatagram {
                payload: payload.to_vec(),
                target,
                source: self.local,
                reply_to: self.inbox_tx.clone(),
            })
            .map_err(|_| DataLinkError::Closed)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), DataLinkError> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some(Inbound::Datagram(payload, source)) => {
                if payload.len() > buf.len() {
                    return Err(DataLinkError::FrameTooLarge);
                }
                buf[..payload.len()].copy_from_slice(&payload);
                Ok((payload.len(), source))
            }
            Some(Inbound::Fault) | None => Err(DataLinkError::Closed),
        }
    }
}

/// Binder side of a [`loopback`] pair.
#[derive(Debug, Clone)]
pub struct LoopbackBinder {
    shared: Arc<Shared>,
}

impl SocketBinder for LoopbackBinder {
    type Socket = LoopbackSocket;

    async fn bind_unicast(&self) -> Result<LoopbackSocket, DataLinkError> {
        Ok(LoopbackSocket::new(&self.shared))
    }

    async fn bind_multicast(
        &self,
        _group: Ipv4Addr,
        _port: u16,
    ) -> Result<LoopbackSocket, DataLinkError> {
        let socket = LoopbackSocket::new(&self.shared);
        self.shared
            .multicast
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(socket.inbox_tx.clone());
        self.shared.multicast_binds.fetch_add(1, Ordering::SeqCst);
        Ok(socket)
    }
}

/// Bridge side of a [`loopback`] pair.
#[derive(Debug)]
pub struct LoopbackNetwork {
    outbound: mpsc::UnboundedReceiver<OutboundDatagram>,
    shared: Arc<Shared>,
}

impl LoopbackNetwork {
    /// Waits for the next datagram sent by any loopback socket.
    pub async fn next_outbound(&mut self) -> Option<OutboundDatagram> {
        self.outbound.recv().await
    }

    pub fn try_next_outbound(&mut self) -> Option<OutboundDatagram> {
        self.outbound.try_recv().ok()
    }

    /// Delivers `payload` to every socket bound on the multicast group and
    /// returns how many received it.
    pub fn publish(&self, payload: &[u8], source: SocketAddr) -> usize {
        self.shared
            .broadcast(|| Inbound::Datagram(payload.to_vec(), source))
    }

    /// A cloneable handle that can publish multicast datagrams from other
    /// tasks.
    pub fn announcer(&self) -> MulticastAnnouncer {
        MulticastAnnouncer {
            shared: self.shared.clone(),
        }
    }

    /// Makes the next receive on every multicast socket fail.
    pub fn break_multicast(&self) {
        self.shared.broadcast(|| Inbound::Fault);
    }

    /// Number of multicast binds performed so far.
    pub fn multicast_binds(&self) -> usize {
        self.shared.multicast_binds.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MulticastAnnouncer {
    shared: Arc<Shared>,
}

impl MulticastAnnouncer {
    pub fn publish(&self, payload: &[u8], source: SocketAddr) -> usize {
        self.shared
            .broadcast(|| Inbound::Datagram(payload.to_vec(), source))
    }
}

#[cfg(test)]
mod tests {
    use super::loopback;
    use crate::{DataLinkError, DatagramSocket, SocketBinder};
    use std::net::{Ipv4Addr, SocketAddr};

    fn bridge() -> SocketAddr {
        ([192, 168, 1, 40], 32100).into()
    }

    #[tokio::test]
    async fn replies_reach_only_the_sending_socket() {
        let (binder, mut network) = loopback();
        let first = binder.bind_unicast().await.unwrap();
        let second = binder.bind_unicast().await.unwrap();

        first.send_to(b"hello", bridge()).await.unwrap();
        let sent = network.next_outbound().await.unwrap();
        assert_eq!(sent.source, first.local_addr());
        assert!(sent.reply(b"ack", bridge()));

        let mut buf = [0u8; 16];
        let (n, from) = first.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ack");
        assert_eq!(from, bridge());
        assert!(network.try_next_outbound().is_none());
        drop(second);
    }

    #[tokio::test]
    async fn reply_to_closed_socket_is_reported() {
        let (binder, mut network) = loopback();
        let socket = binder.bind_unicast().await.unwrap();
        socket.send_to(b"hello", bridge()).await.unwrap();
        drop(socket);

        let sent = network.next_outbound().await.unwrap();
        assert!(!sent.reply(b"late", bridge()));
    }

    #[tokio::test]
    async fn multicast_reaches_every_member_and_faults() {
        let (binder, network) = loopback();
        let group = Ipv4Addr::new(238, 0, 0, 18);
        let a = binder.bind_multicast(group, 32101).await.unwrap();
        let b = binder.bind_multicast(group, 32101).await.unwrap();
        let unicast = binder.bind_unicast().await.unwrap();

        assert_eq!(network.announcer().publish(b"hb", bridge()), 2);
        let mut buf = [0u8; 8];
        assert_eq!(a.recv_from(&mut buf).await.unwrap().0, 2);
        assert_eq!(b.recv_from(&mut buf).await.unwrap().0, 2);

        network.break_multicast();
        assert!(matches!(
            a.recv_from(&mut buf).await,
            Err(DataLinkError::Closed)
        ));
        assert_eq!(network.multicast_binds(), 2);
        drop(unicast);
    }
}
