//! Message bus interfaces
//!
//! Agents only ever see a bus through [`Connector`] and [`Transport`].
//! Subjects are `.`-separated tokens; subscriptions may use `*` for one
//! token and a trailing `>` for one or more tokens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use varsync_core::VarsyncResult;

/// Default bus port of the hub
pub const DEFAULT_PORT: u16 = 49360;

/// A message delivered to a subscription
#[derive(Clone, Debug)]
pub struct Message {
    pub subject: String,
    pub payload: Bytes,
    /// Reply address for request/reply
    pub reply_to: Option<String>,
}

/// Message receiver channel
pub type MessageReceiver = mpsc::UnboundedReceiver<Message>;

/// Message sender channel
pub type MessageSender = mpsc::UnboundedSender<Message>;

/// A standing subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    rx: MessageReceiver,
}

impl Subscription {
    pub fn new(subject: impl Into<String>, rx: MessageReceiver) -> Self {
        Subscription {
            subject: subject.into(),
            rx,
        }
    }

    /// Subject or pattern this subscription listens on
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message; `None` once the connection is closed
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Non-blocking receive
    pub fn try_next(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

/// Where and as whom to connect
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    /// Identity presented to the bus
    pub client_name: String,
}

impl ConnectionSettings {
    pub fn new(host: impl Into<String>, port: u16, client_name: impl Into<String>) -> Self {
        ConnectionSettings {
            host: host.into(),
            port,
            client_name: client_name.into(),
        }
    }

    pub fn address(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            client_name: "varsync".to_string(),
        }
    }
}

/// An open bus connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Name this connection presented on connect
    fn client_name(&self) -> &str;

    /// Subscribe to a subject or wildcard pattern
    async fn subscribe(&self, subject: &str) -> VarsyncResult<Subscription>;

    /// Fire-and-forget publish
    async fn publish(&self, subject: &str, payload: Bytes) -> VarsyncResult<()>;

    /// Publish with a reply address
    async fn publish_request(
        &self,
        subject: &str,
        reply_to: &str,
        payload: Bytes,
    ) -> VarsyncResult<()>;

    /// Request/reply. Fails with `NoResponders` when nothing listens on
    /// `subject` and `Timeout` when nothing replies within `timeout`.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration)
        -> VarsyncResult<Bytes>;

    /// Close the connection. Every subscription of this connection ends.
    async fn close(&self);

    fn is_closed(&self) -> bool;

    /// Answer a request. Messages without a reply address are ignored.
    async fn reply(&self, msg: &Message, payload: Bytes) -> VarsyncResult<()> {
        match &msg.reply_to {
            Some(reply_to) => self.publish(reply_to, payload).await,
            None => {
                tracing::debug!(subject = %msg.subject, "No reply address, dropping response");
                Ok(())
            }
        }
    }
}

/// Opens transports
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect with a bearer token. Fails with `TransportUnavailable` when
    /// the server cannot be reached.
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        token: &str,
    ) -> VarsyncResult<Arc<dyn Transport>>;
}

/// Check a subject or pattern against the token rules
pub fn is_valid_subject(subject: &str, allow_wildcards: bool) -> bool {
    if subject.is_empty() || subject.chars().any(char::is_whitespace) {
        return false;
    }
    let tokens: Vec<&str> = subject.split('.').collect();
    let last = tokens.len() - 1;
    tokens.iter().enumerate().all(|(i, token)| {
        if token.is_empty() {
            return false;
        }
        match *token {
            "*" => allow_wildcards,
            ">" => allow_wildcards && i == last,
            t => !t.contains('*') && !t.contains('>'),
        }
    })
}

/// Whether `subject` is matched by `pattern`
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut tokens = subject.split('.');
    for p in pattern.split('.') {
        if p == ">" {
            return tokens.next().is_some();
        }
        match tokens.next() {
            Some(s) if p == "*" || p == s => {}
            _ => return false,
        }
    }
    tokens.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_subject_matching() {
        let s = "v1.loc.sampleprovider.vars.qry.read";
        assert!(subject_matches(s, s));
        assert!(subject_matches("v1.loc.*.vars.qry.read", s));
        assert!(subject_matches("v1.loc.>", s));
        assert!(subject_matches(">", s));
        assert!(!subject_matches("v1.loc.*.vars", s));
        assert!(!subject_matches("v1.loc.other.vars.qry.read", s));
        assert!(!subject_matches("v1.loc.sampleprovider.vars.qry.read.extra", s));
        assert!(!subject_matches("v1.loc.sampleprovider.vars.qry.read.>", s));
    }

    #[test]
    fn test_subject_validation() {
        assert!(is_valid_subject("v1.loc.a.vars.evt.changed", false));
        assert!(is_valid_subject("v1.loc.*.def.evt.changed", true));
        assert!(is_valid_subject("_INBOX.consumer.>", true));
        assert!(!is_valid_subject("v1.loc.*.def", false));
        assert!(!is_valid_subject("v1..loc", true));
        assert!(!is_valid_subject("v1.>.loc", true));
        assert!(!is_valid_subject("v1.lo*c", true));
        assert!(!is_valid_subject("", true));
        assert!(!is_valid_subject("v1 loc", true));
    }

    #[test]
    fn test_connection_address() {
        let settings = ConnectionSettings::new("192.168.10.108", 49360, "sampleprovider");
        assert_eq!(settings.address(), "nats://192.168.10.108:49360");
        assert_eq!(ConnectionSettings::default().port, DEFAULT_PORT);
    }

    #[tokio::test]
    async fn test_subscription_drains_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new("a.b", rx);
        tx.send(Message {
            subject: "a.b".into(),
            payload: Bytes::from_static(b"x"),
            reply_to: None,
        })
        .unwrap();
        drop(tx);

        assert_eq!(sub.subject(), "a.b");
        assert_eq!(sub.next().await.map(|m| m.payload), Some(Bytes::from_static(b"x")));
        assert!(sub.next().await.is_none());
    }

    proptest! {
        #[test]
        fn prop_single_wildcard_matches_any_token(
            tokens in proptest::collection::vec("[a-z0-9_]{1,8}", 1..6),
            pick in any::<proptest::sample::Index>(),
        ) {
            let subject = tokens.join(".");
            let i = pick.index(tokens.len());
            let mut pattern = tokens.clone();
            pattern[i] = "*".to_string();
            prop_assert!(subject_matches(&subject, &subject));
            prop_assert!(subject_matches(&pattern.join("."), &subject));
            let tail = format!("{}.>", tokens[0]);
            prop_assert_eq!(subject_matches(&tail, &subject), tokens.len() > 1);
        }
    }
}
