// Broadcast Hub - typed fan-out to every subscriber
// Bounded ring per subscriber: a laggard loses its oldest messages and keeps
// a drop count; publishers never block

pub mod messages;

pub use messages::{ClientMessage, WsMessage, FRESH_X};

use tokio::sync::broadcast;
use tracing::debug;

/// Multi-producer, multi-subscriber fan-out of `WsMessage`. Cloning is cheap;
/// every task that emits holds a clone.
#[derive(Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<WsMessage>,
}

impl BroadcastHub {
    pub fn new(subscriber_capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(subscriber_capacity.max(1));
        Self { tx }
    }

    /// Fan a message out to every current subscriber. Messages published with
    /// no subscribers are simply gone.
    pub fn publish(&self, message: WsMessage) {
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> HubSubscriber {
        HubSubscriber {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's end of the hub. Delivery is FIFO in emission order; when
/// the subscriber falls more than the buffer capacity behind, the oldest
/// undelivered messages are skipped and counted in `dropped`.
pub struct HubSubscriber {
    rx: broadcast::Receiver<WsMessage>,
    dropped: u64,
}

impl HubSubscriber {
    /// Next message, or None when the hub has shut down.
    pub async fn recv(&mut self) -> Option<WsMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    debug!(skipped, total_dropped = self.dropped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant; None when empty or closed.
    pub fn try_recv(&mut self) -> Option<WsMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                }
                Err(_) => return None,
            }
        }
    }

    /// Messages this subscriber lost to backpressure.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::messages::CvdPointMsg;

    fn point(value: i64) -> WsMessage {
        WsMessage::CVDPoint(CvdPointMsg {
            timestamp: value as u64,
            value,
            x: FRESH_X,
        })
    }

    #[tokio::test]
    async fn test_fifo_delivery_per_subscriber() {
        let hub = BroadcastHub::new(16);
        let mut sub = hub.subscribe();
        for i in 0..5 {
            hub.publish(point(i));
        }
        for i in 0..5 {
            match sub.recv().await.unwrap() {
                WsMessage::CVDPoint(p) => assert_eq!(p.value, i),
                other => panic!("unexpected message {:?}", other),
            }
        }
        assert_eq!(sub.dropped(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_and_counts() {
        let hub = BroadcastHub::new(1024);
        let mut fast = hub.subscribe();
        let mut slow = hub.subscribe();

        // fast consumer keeps up while 2000 messages go out
        let reader = tokio::spawn(async move {
            let mut seen = Vec::with_capacity(2000);
            while seen.len() < 2000 {
                if let Some(WsMessage::CVDPoint(p)) = fast.recv().await {
                    seen.push(p.value);
                }
            }
            seen
        });

        for i in 0..2000 {
            hub.publish(point(i));
            // yield so the fast reader can drain
            if i % 64 == 0 {
                tokio::task::yield_now().await;
            }
        }

        let seen = reader.await.unwrap();
        assert_eq!(seen.len(), 2000);
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "fast sees order");

        // the blocked subscriber now drains: oldest were dropped, the rest
        // arrive in order, and the drop counter covers the difference
        let mut delivered = Vec::new();
        while let Some(WsMessage::CVDPoint(p)) = slow.try_recv() {
            delivered.push(p.value);
        }
        assert!(delivered.windows(2).all(|w| w[0] < w[1]));
        assert!(slow.dropped() >= 976, "dropped {}", slow.dropped());
        assert_eq!(delivered.len() as u64 + slow.dropped(), 2000);
    }

    #[tokio::test]
    async fn test_recv_none_after_hub_dropped() {
        let hub = BroadcastHub::new(4);
        let mut sub = hub.subscribe();
        hub.publish(point(1));
        drop(hub);
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }
}
