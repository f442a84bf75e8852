//! Deterministic in-memory transport for tests.
//!
//! Each `MockDirectory` behaves like a relay: every envelope sent through
//! one of its channels is delivered to every subscriber of that
//! directory, sender included. Nick-level routing is the application's
//! job, exactly as with a real directory.

use crate::foundation::{CoinjoinError, Result};
use crate::infrastructure::message::envelope::Envelope;
use crate::infrastructure::transport::{ChannelSubscription, Incoming, MessageChannel};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct MockDirectory {
    hostid: String,
    sender: broadcast::Sender<Incoming>,
}

impl MockDirectory {
    pub fn new(hostid: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { hostid: hostid.into(), sender: broadcast::channel(1024).0 })
    }

    /// A channel handle as one participant sees it.
    pub fn channel(self: &Arc<Self>) -> Arc<MockChannel> {
        Arc::new(MockChannel { directory: Arc::clone(self) })
    }

    pub fn hostid(&self) -> &str {
        &self.hostid
    }
}

pub struct MockChannel {
    directory: Arc<MockDirectory>,
}

#[async_trait]
impl MessageChannel for MockChannel {
    fn hostid(&self) -> &str {
        &self.directory.hostid
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        let incoming = Incoming { hostid: self.directory.hostid.clone(), envelope };
        // No receivers just means nobody is listening yet; real relays do
        // not error on that either.
        let _ = self.directory.sender.send(incoming);
        Ok(())
    }

    async fn subscribe(&self) -> Result<ChannelSubscription> {
        let mut receiver = self.directory.sender.subscribe();
        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(incoming) => yield Ok(incoming),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Err(CoinjoinError::transport("mock-recv", format!("lagged {n} messages")));
                    }
                }
            }
        };
        Ok(ChannelSubscription::new(Box::pin(stream)))
    }
}
