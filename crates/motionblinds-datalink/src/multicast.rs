use crate::{DatagramSocket, SocketBinder, MAX_DATAGRAM_LEN};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// One datagram received on the multicast group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
}

/// Exponential delay between attempts to rebind the multicast socket.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Returns the delay to wait now and doubles the next one, up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}

/// Receives datagrams forwarded by the driver of [`create_multicast_listener`].
#[derive(Debug)]
pub struct MulticastListener {
    rx: mpsc::UnboundedReceiver<Datagram>,
}

impl MulticastListener {
    /// Waits for the next datagram. `None` once the driver has stopped.
    pub async fn recv(&mut self) -> Option<Datagram> {
        self.rx.recv().await
    }
}

/// Create a listener on the multicast `group` and the future that drives it.
///
/// The driver binds the group, forwards every datagram to the listener and,
/// when the socket fails, rebinds after a [`ReconnectBackoff`] delay. It runs
/// until the [`MulticastListener`] is dropped. Spawn it:
///
/// ```no_run
/// # use motionblinds_datalink::*;
/// # use std::net::Ipv4Addr;
/// # use std::sync::Arc;
/// # async fn example() {
/// let binder = Arc::new(UdpBinder::new());
/// let (mut listener, driver) = create_multicast_listener(
///     binder,
///     Ipv4Addr::new(238, 0, 0, 18),
///     32101,
///     ReconnectBackoff::default(),
/// );
/// tokio::spawn(driver);
/// while let Some(datagram) = listener.recv().await {
///     println!("{} bytes from {}", datagram.payload.len(), datagram.source);
/// }
/// # }
/// ```
pub fn create_multicast_listener<B: SocketBinder>(
    binder: Arc<B>,
    group: Ipv4Addr,
    port: u16,
    mut backoff: ReconnectBackoff,
) -> (MulticastListener, impl Future<Output = ()> + Send + 'static) {
    let (tx, rx) = mpsc::unbounded_channel();
    let driver = async move {
        loop {
            let socket = tokio::select! {
                _ = tx.closed() => return,
                bound = binder.bind_multicast(group, port) => bound,
            };
            let socket = match socket {
                Ok(socket) => socket,
                Err(e) => {
                    let delay = backoff.next_delay();
                    log::warn!("binding multicast group {group}:{port} failed: {e}; retrying in {delay:?}");
                    tokio::select! {
                        _ = tx.closed() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };
            log::debug!("listening on multicast group {group}:{port}");

            let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
            let error = loop {
                let received = tokio::select! {
                    _ = tx.closed() => return,
                    received = socket.recv_from(&mut buf) => received,
                };
                match received {
                    Ok((n, source)) => {
                        backoff.reset();
                        let datagram = Datagram {
                            payload: buf[..n].to_vec(),
                            source,
                        };
                        if tx.send(datagram).is_err() {
                            return; // listener dropped
                        }
                    }
                    Err(e) => break e,
                }
            };
            drop(socket);

            let delay = backoff.next_delay();
            log::warn!("multicast socket failed: {error}; reconnecting in {delay:?}");
            tokio::select! {
                _ = tx.closed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    };

    (MulticastListener { rx }, driver)
}

#[cfg(test)]
mod tests {
    use super::{create_multicast_listener, ReconnectBackoff};
    use crate::loopback;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::Arc;
    use tokio::time::Duration;

    const GROUP: Ipv4Addr = Ipv4Addr::new(238, 0, 0, 18);

    fn bridge() -> SocketAddr {
        ([192, 168, 1, 40], 32101).into()
    }

    #[test]
    fn backoff_doubles_up_to_max_and_resets() {
        let mut backoff =
            ReconnectBackoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_datagrams_in_order() {
        let (binder, network) = loopback();
        let (mut listener, driver) =
            create_multicast_listener(Arc::new(binder), GROUP, 32101, ReconnectBackoff::default());
        let handle = tokio::spawn(driver);

        while network.multicast_binds() == 0 {
            tokio::task::yield_now().await;
        }
        network.publish(b"one", bridge());
        network.publish(b"two", bridge());

        assert_eq!(listener.recv().await.unwrap().payload, b"one");
        let second = listener.recv().await.unwrap();
        assert_eq!(second.payload, b"two");
        assert_eq!(second.source, bridge());

        drop(listener);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rebinds_after_socket_failure() {
        let (binder, network) = loopback();
        let (mut listener, driver) =
            create_multicast_listener(Arc::new(binder), GROUP, 32101, ReconnectBackoff::default());
        tokio::spawn(driver);

        while network.multicast_binds() == 0 {
            tokio::task::yield_now().await;
        }
        network.break_multicast();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(network.multicast_binds(), 2);

        network.publish(b"after", bridge());
        assert_eq!(listener.recv().await.unwrap().payload, b"after");
    }
}
