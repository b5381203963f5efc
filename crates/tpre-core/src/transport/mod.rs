//! Topic pub/sub abstraction the session runs over
//!
//! The protocol only assumes a broadcast medium with named topics; anything
//! that can publish opaque payloads and hand out per-topic subscriptions can
//! carry it. [`memory::MemoryHub`] is the in-process implementation used for
//! tests and local simulation.

use crate::Result;

pub use ::async_trait::async_trait;

/// Protocol topics, with their normative wire names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Readiness signals exchanged before dealing starts
    Ready,
    /// Encrypted deals, one per (dealer, target) pair
    Deal,
    /// Verdicts and justifications
    Response,
    /// Feldman commitment reveals from certified dealers
    SecretCommits,
}

impl Topic {
    pub const ALL: [Topic; 4] = [Topic::Ready, Topic::Deal, Topic::Response, Topic::SecretCommits];

    /// The topic name as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Ready => "ready",
            Topic::Deal => "deal",
            Topic::Response => "response",
            Topic::SecretCommits => "secret_commits",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message transport for one participant
#[async_trait]
pub trait Transport: Send + Sync {
    /// Broadcast a payload to every subscriber of a topic, including this
    /// node's own subscriptions
    async fn publish(&self, topic: Topic, payload: &[u8]) -> Result<()>;

    /// Open a subscription to a topic. Messages published before this call
    /// may not be delivered; the session's readiness barrier exists so that
    /// no protocol message is published before every peer subscribed.
    async fn subscribe(&self, topic: Topic) -> Result<Box<dyn Subscription>>;
}

/// A live per-topic subscription
#[async_trait]
pub trait Subscription: Send {
    /// Receive the next payload, waiting as long as it takes. Errors are
    /// reported to the caller, never terminal for the process.
    async fn recv(&mut self) -> Result<Vec<u8>>;
}

pub mod memory;

pub use memory::{MemoryHub, MemoryTransport};
