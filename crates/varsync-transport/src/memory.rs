//! In-process message bus
//!
//! Runs the full agent protocol inside one process: wildcard
//! subscriptions, request/reply over per-connection inboxes, `NoResponders`
//! when nothing listens, and a switch to make the server unreachable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use varsync_core::{VarsyncError, VarsyncResult};

use crate::bus::{
    is_valid_subject, subject_matches, ConnectionSettings, Connector, Message, MessageSender,
    Subscription, Transport,
};

struct SubscriptionEntry {
    client: u64,
    pattern: String,
    tx: MessageSender,
}

#[derive(Default)]
struct BusInner {
    subscriptions: Mutex<Vec<SubscriptionEntry>>,
    unavailable: AtomicBool,
    required_token: Mutex<Option<String>>,
    next_client: AtomicU64,
    published: AtomicU64,
}

/// Shared in-process bus. Clones refer to the same bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        MemoryBus::default()
    }

    /// Reject connections whose token differs from `token`
    pub fn with_required_token(token: impl Into<String>) -> Self {
        let bus = MemoryBus::new();
        *bus.inner.required_token.lock() = Some(token.into());
        bus
    }

    /// Simulate the server going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.inner.unavailable.load(Ordering::SeqCst)
    }

    /// Open a connection without authentication
    pub fn client(&self, name: &str) -> MemoryClient {
        let id = self.inner.next_client.fetch_add(1, Ordering::Relaxed);
        MemoryClient {
            bus: self.clone(),
            id,
            name: name.to_string(),
            inbox_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Live subscriptions that would receive a message on `subject`
    pub fn subscriber_count(&self, subject: &str) -> usize {
        let mut subs = self.inner.subscriptions.lock();
        subs.retain(|s| !s.tx.is_closed());
        subs.iter()
            .filter(|s| subject_matches(&s.pattern, subject))
            .count()
    }

    /// Total messages published so far
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    fn add_subscription(&self, client: u64, pattern: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscriptions.lock().push(SubscriptionEntry {
            client,
            pattern: pattern.to_string(),
            tx,
        });
        Subscription::new(pattern, rx)
    }

    fn remove_client(&self, client: u64) {
        self.inner.subscriptions.lock().retain(|s| s.client != client);
    }

    /// Deliver to every matching subscription; returns the receiver count
    fn deliver(&self, msg: Message) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.inner.subscriptions.lock();
        subs.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for sub in subs.iter().filter(|s| subject_matches(&s.pattern, &msg.subject)) {
            if sub.tx.send(msg.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

#[async_trait]
impl Connector for MemoryBus {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        token: &str,
    ) -> VarsyncResult<Arc<dyn Transport>> {
        if !self.is_available() {
            return Err(VarsyncError::TransportUnavailable(format!(
                "Cannot reach {}",
                settings.address()
            )));
        }
        let required = self.inner.required_token.lock().clone();
        if let Some(required) = required {
            if required != token {
                return Err(VarsyncError::AuthFailure(format!(
                    "Token rejected for client {}",
                    settings.client_name
                )));
            }
        }
        tracing::debug!(client = %settings.client_name, address = %settings.address(), "Connected to memory bus");
        Ok(Arc::new(self.client(&settings.client_name)))
    }
}

/// One connection to a [`MemoryBus`]
pub struct MemoryClient {
    bus: MemoryBus,
    id: u64,
    name: String,
    inbox_seq: AtomicU64,
    closed: AtomicBool,
}

impl MemoryClient {
    fn ensure_open(&self) -> VarsyncResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VarsyncError::ConnectionClosed);
        }
        if !self.bus.is_available() {
            return Err(VarsyncError::TransportUnavailable(
                "Memory bus is unavailable".into(),
            ));
        }
        Ok(())
    }

    fn check_subject(subject: &str, allow_wildcards: bool) -> VarsyncResult<()> {
        if is_valid_subject(subject, allow_wildcards) {
            Ok(())
        } else {
            Err(VarsyncError::Config(format!("Invalid subject: {:?}", subject)))
        }
    }

    fn next_inbox(&self) -> String {
        let token: String = self
            .name
            .chars()
            .map(|c| if c == '.' || c == '*' || c == '>' || c.is_whitespace() { '_' } else { c })
            .collect();
        let seq = self.inbox_seq.fetch_add(1, Ordering::Relaxed);
        // Names may repeat across connections; the connection id may not
        format!(
            "_INBOX.{}.{}.{}",
            if token.is_empty() { "anon" } else { &token },
            self.id,
            seq
        )
    }
}

#[async_trait]
impl Transport for MemoryClient {
    fn client_name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, subject: &str) -> VarsyncResult<Subscription> {
        self.ensure_open()?;
        Self::check_subject(subject, true)?;
        Ok(self.bus.add_subscription(self.id, subject))
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> VarsyncResult<()> {
        self.ensure_open()?;
        Self::check_subject(subject, false)?;
        self.bus.deliver(Message {
            subject: subject.to_string(),
            payload,
            reply_to: None,
        });
        Ok(())
    }

    async fn publish_request(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> VarsyncResult<()> {
        self.ensure_open()?;
        Self::check_subject(subject, false)?;
        self.bus.deliver(Message {
            subject: subject.to_string(),
            payload,
            reply_to: Some(reply_to.to_string()),
        });
        Ok(())
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> VarsyncResult<Bytes> {
        self.ensure_open()?;
        Self::check_subject(subject, false)?;

        let inbox = self.next_inbox();
        let mut replies = self.bus.add_subscription(self.id, &inbox);
        let delivered = self.bus.deliver(Message {
            subject: subject.to_string(),
            payload,
            reply_to: Some(inbox),
        });
        if delivered == 0 {
            return Err(VarsyncError::NoResponders(subject.to_string()));
        }

        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(reply)) => Ok(reply.payload),
            Ok(None) => Err(VarsyncError::ConnectionClosed),
            Err(_) => Err(VarsyncError::Timeout {
                subject: subject.to_string(),
                after: timeout,
            }),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.bus.remove_client(self.id);
            tracing::debug!(client = %self.name, "Memory bus connection closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
