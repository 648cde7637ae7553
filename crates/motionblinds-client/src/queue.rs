//! FIFO command queue with response correlation.
//!
//! Every unicast command goes through one [`CommandQueue`]. Its driver takes
//! one [`PendingCall`] at a time, opens a fresh socket for it, and waits for
//! the matching `<type>Ack` or the call timeout before looking at the next
//! one. A call that times out resolves with no response; it is not an error.

use crate::ClientError;
use motionblinds_core::message::{Message, Request};
use motionblinds_datalink::{exchange, Collect, SocketBinder};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A command waiting for its turn on the unicast channel.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub request: Request,
    pub target: SocketAddr,
    pub collect: Collect,
    pub timeout: Duration,
}

impl PendingCall {
    /// Targeted requests wait for the first matching ack; broadcast requests
    /// collect every ack for the whole window.
    pub fn new(request: Request, target: SocketAddr, timeout: Duration) -> Self {
        let collect = if request.is_broadcast() {
            Collect::All
        } else {
            Collect::First
        };
        Self {
            request,
            target,
            collect,
            timeout,
        }
    }
}

/// An acknowledgement and the address it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub message: Message,
    pub source: SocketAddr,
}

type Reply = oneshot::Sender<Result<Vec<Response>, ClientError>>;

#[derive(Debug)]
struct Queued {
    call: PendingCall,
    reply: Reply,
}

/// Resolves once the queue has dispatched the call.
#[derive(Debug)]
pub struct CallHandle {
    rx: oneshot::Receiver<Result<Vec<Response>, ClientError>>,
}

impl CallHandle {
    /// First accepted response, `None` if the call timed out.
    pub async fn response(self) -> Result<Option<Response>, ClientError> {
        Ok(self.responses().await?.into_iter().next())
    }

    /// Every accepted response, in arrival order.
    pub async fn responses(self) -> Result<Vec<Response>, ClientError> {
        self.rx.await.map_err(|_| ClientError::QueueClosed)?
    }
}

#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Queued>,
}

impl CommandQueue {
    /// Appends `call` to the queue. Dropping the returned handle does not
    /// cancel the call.
    pub fn enqueue(&self, call: PendingCall) -> CallHandle {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Queued { call, reply }).is_err() {
            log::debug!("command queue closed; call dropped");
        }
        CallHandle { rx }
    }
}

/// Create a command queue and the future that dispatches its calls.
///
/// The driver runs until every [`CommandQueue`] clone has been dropped.
pub fn command_queue<B: SocketBinder>(
    binder: Arc<B>,
) -> (CommandQueue, impl Future<Output = ()> + Send + 'static) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Queued>();
    let driver = async move {
        while let Some(Queued { call, reply }) = rx.recv().await {
            let result = dispatch(binder.as_ref(), &call).await;
            if let Err(e) = &result {
                log::warn!("{} to {} failed: {e}", call.request.msg_type, call.target);
            }
            let _ = reply.send(result);
        }
    };
    (CommandQueue { tx }, driver)
}

async fn dispatch<B: SocketBinder>(
    binder: &B,
    call: &PendingCall,
) -> Result<Vec<Response>, ClientError> {
    let request = &call.request;
    let payload = request.encode()?;
    log::debug!(
        "sending {} to {} at {}",
        request.msg_type,
        request.mac.as_ref().map_or("all", |mac| mac.as_str()),
        call.target
    );

    let socket = binder.bind_unicast().await?;
    let responses = exchange(
        socket,
        call.target,
        &payload,
        call.timeout,
        call.collect,
        |frame, source| match Message::decode(frame) {
            Ok(message) if message.answers(request) => Some(Response { message, source }),
            Ok(message) => {
                log::debug!("ignoring unicast {} from {source}", message.msg_type);
                None
            }
            Err(e) => {
                log::debug!("dropping malformed unicast datagram from {source}: {e}");
                None
            }
        },
    )
    .await?;

    if responses.is_empty() {
        log::debug!(
            "{} to {} got no response within {:?}",
            request.msg_type,
            call.target,
            call.timeout
        );
    }
    Ok(responses)
}

#[cfg(test)]
mod tests {
    use super::{command_queue, PendingCall};
    use crate::ClientError;
    use motionblinds_core::message::{Message, MessageType, Request};
    use motionblinds_core::types::{DeviceType, Mac};
    use motionblinds_datalink::loopback;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::time::{Duration, Instant};

    fn bridge() -> SocketAddr {
        ([192, 168, 1, 40], 32100).into()
    }

    fn read(mac: &str) -> PendingCall {
        PendingCall::new(
            Request::targeted(MessageType::ReadDevice, Mac::from(mac), DeviceType::Blind),
            bridge(),
            Duration::from_secs(5),
        )
    }

    fn ack(mac: &str) -> Vec<u8> {
        Message::new(MessageType::ReadDeviceAck)
            .with_mac(Mac::from(mac))
            .encode()
            .unwrap()
    }

    fn sent_mac(payload: &[u8]) -> Mac {
        Request::decode(payload).unwrap().mac.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_one_call_at_a_time_in_order() {
        let (binder, mut network) = loopback();
        let (queue, driver) = command_queue(Arc::new(binder));
        tokio::spawn(driver);

        let first = queue.enqueue(read("a"));
        let second = queue.enqueue(read("b"));
        let third = queue.enqueue(read("c"));

        let sent = network.next_outbound().await.unwrap();
        assert_eq!(sent_mac(&sent.payload), Mac::from("a"));

        // The first bridge answers slowly; nothing else may go out meanwhile.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(network.try_next_outbound().is_none());
        sent.reply(&ack("a"), bridge());

        for expected in ["b", "c"] {
            let sent = network.next_outbound().await.unwrap();
            assert_eq!(sent_mac(&sent.payload), Mac::from(expected));
            sent.reply(&ack(expected), bridge());
        }

        for (handle, expected) in [(first, "a"), (second, "b"), (third, "c")] {
            let response = handle.response().await.unwrap().unwrap();
            assert_eq!(response.message.mac, Some(Mac::from(expected)));
            assert_eq!(response.source, bridge());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_resolves_empty_and_next_call_proceeds() {
        let (binder, mut network) = loopback();
        let (queue, driver) = command_queue(Arc::new(binder));
        tokio::spawn(driver);

        let started = Instant::now();
        let silent = queue.enqueue(read("a"));
        let next = queue.enqueue(read("b"));

        let _ignored = network.next_outbound().await.unwrap();
        let sent = network.next_outbound().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(sent_mac(&sent.payload), Mac::from("b"));
        sent.reply(&ack("b"), bridge());

        assert!(silent.response().await.unwrap().is_none());
        assert!(next.response().await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn acks_for_other_devices_and_reports_are_not_responses() {
        let (binder, mut network) = loopback();
        let (queue, driver) = command_queue(Arc::new(binder));
        tokio::spawn(driver);

        let handle = queue.enqueue(read("a"));
        let sent = network.next_outbound().await.unwrap();
        sent.reply(&ack("b"), bridge());
        sent.reply(
            &Message::new(MessageType::Report)
                .with_mac(Mac::from("a"))
                .encode()
                .unwrap(),
            bridge(),
        );
        sent.reply(b"{not json", bridge());
        sent.reply(&ack("a"), bridge());

        let response = handle.response().await.unwrap().unwrap();
        assert_eq!(response.message.msg_type, MessageType::ReadDeviceAck);
        assert_eq!(response.message.mac, Some(Mac::from("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_collects_every_bridge() {
        let (binder, mut network) = loopback();
        let (queue, driver) = command_queue(Arc::new(binder));
        tokio::spawn(driver);

        let handle = queue.enqueue(PendingCall::new(
            Request::broadcast(MessageType::GetDeviceList),
            bridge(),
            Duration::from_secs(5),
        ));
        let sent = network.next_outbound().await.unwrap();
        for (mac, ip) in [("aa", [10, 0, 0, 1]), ("bb", [10, 0, 0, 2])] {
            let frame = Message::new(MessageType::GetDeviceListAck)
                .with_mac(Mac::from(mac))
                .encode()
                .unwrap();
            sent.reply(&frame, (ip, 32100).into());
        }

        let responses = handle.responses().await.unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[1].source, SocketAddr::from(([10, 0, 0, 2], 32100)));
    }

    #[tokio::test]
    async fn closed_queue_reports_error() {
        let (binder, _network) = loopback();
        let (queue, driver) = command_queue(Arc::new(binder));
        drop(driver);

        let handle = queue.enqueue(read("a"));
        assert!(matches!(
            handle.response().await,
            Err(ClientError::QueueClosed)
        ));
    }
}
