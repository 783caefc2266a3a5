//! In-process bus used when both services run in one process, and in tests

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{IncomingRequest, Message, MessageBus, Subscription};
use crate::error::{Error, Result};

/// Default queue depth per subscriber
const DEFAULT_CAPACITY: usize = 1024;

/// Subscribers of one subject
#[derive(Default)]
struct SubjectQueue {
    senders: Vec<mpsc::Sender<IncomingRequest>>,
    next: usize,
}

/// In-memory request/reply bus
pub struct InMemoryBus {
    subjects: DashMap<String, SubjectQueue>,
    capacity: usize,
}

impl InMemoryBus {
    /// Create a new in-memory bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new in-memory bus with a per-subscriber queue depth
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subjects: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscribers on a subject
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.subjects
            .get(subject)
            .map(|queue| queue.senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Pick the next live subscriber, round-robin, dropping closed ones
    fn pick(&self, subject: &str) -> Option<mpsc::Sender<IncomingRequest>> {
        let mut queue = self.subjects.get_mut(subject)?;
        queue.senders.retain(|sender| !sender.is_closed());
        if queue.senders.is_empty() {
            return None;
        }

        let index = queue.next % queue.senders.len();
        queue.next = queue.next.wrapping_add(1);
        Some(queue.senders[index].clone())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .senders
            .push(sender);

        debug!("Subscribed to {}", subject);
        Ok(Subscription::new(subject.to_string(), receiver))
    }

    async fn request(&self, subject: &str, message: Message, timeout: Duration) -> Result<Message> {
        let sender = self
            .pick(subject)
            .ok_or_else(|| Error::UpstreamUnavailable(format!("no responders on {}", subject)))?;

        let (reply_to, reply) = oneshot::channel();
        let request = IncomingRequest::new(subject.to_string(), message, reply_to);

        let exchange = async move {
            sender
                .send(request)
                .await
                .map_err(|_| Error::UpstreamUnavailable(format!("responder on {} went away", subject)))?;

            reply.await.map_err(|_| {
                Error::UpstreamUnavailable(format!("responder on {} dropped the request", subject))
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!("No reply on {} within {:?}", subject, timeout);
                Err(Error::UpstreamTimeout(format!("no reply on {} within {:?}", subject, timeout)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("echo").await.unwrap();

        tokio::spawn(async move {
            while let Some(req) = sub.next().await {
                let reply = Message::new(req.message.payload.clone());
                req.respond(reply);
            }
        });

        let reply = bus
            .request("echo", Message::new("ping"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply.payload_str().unwrap(), "ping");
    }

    #[tokio::test]
    async fn test_no_responders() {
        let bus = InMemoryBus::new();
        let result = bus.request("nobody", Message::new("x"), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_timeout_when_responder_is_silent() {
        let bus = InMemoryBus::new();
        let mut sub = bus.subscribe("slow").await.unwrap();

        let handle = tokio::spawn(async move {
            let req = sub.next().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            // Caller is gone by now
            req.respond(Message::new("late"))
        });

        let result = bus.request("slow", Message::new("x"), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::UpstreamTimeout(_))));
        assert!(!handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_skipped() {
        let bus = InMemoryBus::new();
        let dropped = bus.subscribe("s").await.unwrap();
        let mut live = bus.subscribe("s").await.unwrap();
        drop(dropped);
        assert_eq!(bus.subscriber_count("s"), 1);

        tokio::spawn(async move {
            while let Some(req) = live.next().await {
                req.respond(Message::new("ok"));
            }
        });

        for _ in 0..3 {
            let reply = bus.request("s", Message::new("x"), Duration::from_secs(1)).await.unwrap();
            assert_eq!(reply.payload, b"ok".to_vec());
        }
    }
}
