//! Single-use request/response exchange over a dedicated socket.

use crate::{DataLinkError, DatagramSocket, MAX_DATAGRAM_LEN};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{timeout, Instant};

/// How many accepted replies an [`exchange`] waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collect {
    /// Return as soon as one reply is accepted.
    First,
    /// Keep listening for the whole window and return every accepted reply.
    All,
}

/// Sends `payload` to `target` on `socket` and gathers the replies that
/// `accept` maps to `Some`.
///
/// Replies `accept` rejects are dropped and the wait continues. The call
/// never outlives `window`; running out of time is not an error, it yields
/// whatever was accepted so far (possibly nothing). The socket is consumed
/// and closed when the exchange returns.
pub async fn exchange<S, T, F>(
    socket: S,
    target: SocketAddr,
    payload: &[u8],
    window: Duration,
    collect: Collect,
    mut accept: F,
) -> Result<Vec<T>, DataLinkError>
where
    S: DatagramSocket,
    F: FnMut(&[u8], SocketAddr) -> Option<T>,
{
    socket.send_to(payload, target).await?;

    let deadline = Instant::now() + window;
    let mut accepted = Vec::new();
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let (n, source) = match timeout(remaining, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(received) => received?,
        };
        if let Some(item) = accept(&buf[..n], source) {
            accepted.push(item);
            if collect == Collect::First {
                break;
            }
        }
    }

    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::{exchange, Collect};
    use crate::loopback;
    use crate::SocketBinder;
    use std::net::SocketAddr;
    use tokio::time::{Duration, Instant};

    fn bridge() -> SocketAddr {
        ([192, 168, 1, 40], 32100).into()
    }

    #[tokio::test(start_paused = true)]
    async fn first_mode_skips_rejected_replies() {
        let (binder, mut network) = loopback();
        let socket = binder.bind_unicast().await.unwrap();

        let responder = tokio::spawn(async move {
            let sent = network.next_outbound().await.unwrap();
            assert_eq!(sent.payload, b"req");
            assert_eq!(sent.target, bridge());
            sent.reply(b"noise", bridge());
            sent.reply(b"ack-1", bridge());
            sent.reply(b"ack-2", bridge());
        });

        let started = Instant::now();
        let replies = exchange(
            socket,
            bridge(),
            b"req",
            Duration::from_secs(5),
            Collect::First,
            |frame, _| frame.starts_with(b"ack").then(|| frame.to_vec()),
        )
        .await
        .unwrap();

        assert_eq!(replies, vec![b"ack-1".to_vec()]);
        assert!(started.elapsed() < Duration::from_secs(5));
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn all_mode_waits_for_the_full_window() {
        let (binder, mut network) = loopback();
        let socket = binder.bind_unicast().await.unwrap();

        let responder = tokio::spawn(async move {
            let sent = network.next_outbound().await.unwrap();
            sent.reply(b"a", ([10, 0, 0, 1], 32100).into());
            sent.reply(b"b", ([10, 0, 0, 2], 32100).into());
        });

        let started = Instant::now();
        let replies = exchange(
            socket,
            bridge(),
            b"req",
            Duration::from_secs(5),
            Collect::All,
            |frame, source| Some((frame.to_vec(), source)),
        )
        .await
        .unwrap();

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1].1, ([10, 0, 0, 2], 32100).into());
        assert!(started.elapsed() >= Duration::from_secs(5));
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silence_resolves_empty_after_window() {
        let (binder, _network) = loopback();
        let socket = binder.bind_unicast().await.unwrap();

        let started = Instant::now();
        let replies: Vec<Vec<u8>> = exchange(
            socket,
            bridge(),
            b"req",
            Duration::from_secs(5),
            Collect::First,
            |frame, _| Some(frame.to_vec()),
        )
        .await
        .unwrap();

        assert!(replies.is_empty());
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
