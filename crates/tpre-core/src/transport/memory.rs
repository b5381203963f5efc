//! In-memory pub/sub hub for testing and local simulation

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::warn;

use super::{async_trait, Subscription, Topic, Transport};
use crate::{Error, Result};

const CHANNEL_CAPACITY: usize = 1024;

/// Shared in-process message hub. Each participant attaches its own
/// [`MemoryTransport`] handle; everything published on a topic reaches every
/// subscription on that topic, the publisher's own included.
pub struct MemoryHub {
    topics: Arc<DashMap<Topic, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
        }
    }

    /// Create a transport handle bound to this hub
    pub fn attach(&self) -> MemoryTransport {
        MemoryTransport {
            topics: Arc::clone(&self.topics),
        }
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One participant's handle onto a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryTransport {
    topics: Arc<DashMap<Topic, broadcast::Sender<Vec<u8>>>>,
}

impl MemoryTransport {
    fn sender(&self, topic: Topic) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: Topic, payload: &[u8]) -> Result<()> {
        // A publish with no live subscriptions is not an error.
        let _ = self.sender(topic).send(payload.to_vec());
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<Box<dyn Subscription>> {
        Ok(Box::new(MemorySubscription {
            topic,
            rx: self.sender(topic).subscribe(),
        }))
    }
}

struct MemorySubscription {
    topic: Topic,
    rx: broadcast::Receiver<Vec<u8>>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Result<Vec<u8>> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Ok(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "subscription lagged, messages dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::Transport(format!(
                        "topic {} closed",
                        self.topic
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let hub = MemoryHub::new();
        let a = hub.attach();
        let b = hub.attach();

        let mut sub_a = a.subscribe(Topic::Deal).await.unwrap();
        let mut sub_b = b.subscribe(Topic::Deal).await.unwrap();

        a.publish(Topic::Deal, b"hello").await.unwrap();

        assert_eq!(sub_a.recv().await.unwrap(), b"hello");
        assert_eq!(sub_b.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let hub = MemoryHub::new();
        let t = hub.attach();

        let mut responses = t.subscribe(Topic::Response).await.unwrap();
        t.publish(Topic::Deal, b"deal").await.unwrap();
        t.publish(Topic::Response, b"response").await.unwrap();

        assert_eq!(responses.recv().await.unwrap(), b"response");
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let hub = MemoryHub::new();
        let t = hub.attach();
        t.publish(Topic::SecretCommits, b"ignored").await.unwrap();
    }
}
