pub mod handshake;
pub mod mock;

use crate::foundation::Result;
use crate::infrastructure::message::envelope::Envelope;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

/// An envelope as it arrived, tagged with the channel it came through.
/// `hostid` is the directory's host for relayed channels or the literal
/// `onion-network` for direct peer links; it feeds anti-replay signing
/// and channel-consistency checks.
#[derive(Clone, Debug)]
pub struct Incoming {
    pub hostid: String,
    pub envelope: Envelope,
}

pub struct ChannelSubscription {
    inner: BoxStream<'static, Result<Incoming>>,
}

impl ChannelSubscription {
    pub fn new(inner: BoxStream<'static, Result<Incoming>>) -> Self {
        Self { inner }
    }

    pub async fn next(&mut self) -> Option<Result<Incoming>> {
        self.inner.next().await
    }
}

/// One bidirectional message channel: a directory connection or a direct
/// peer link. Sending may suspend; ordering is preserved per channel.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    fn hostid(&self) -> &str;
    async fn send(&self, envelope: Envelope) -> Result<()>;
    async fn subscribe(&self) -> Result<ChannelSubscription>;
}

/// Reconnect pacing for transient transport failures: exponential
/// backoff, doubling from `initial` up to `cap`. Sessions that depended
/// on the dead channel are failed by their engines; the channel itself
/// keeps retrying at this cadence.
#[derive(Clone, Debug)]
pub struct Backoff {
    next: std::time::Duration,
    cap: std::time::Duration,
}

impl Backoff {
    pub fn new(initial: std::time::Duration, cap: std::time::Duration) -> Self {
        Self { next: initial, cap }
    }

    pub fn next_delay(&mut self) -> std::time::Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.cap);
        delay
    }

    pub fn reset(&mut self, initial: std::time::Duration) {
        self.next = initial;
    }
}

/// Drive a reconnecting channel: call `connect` until it succeeds,
/// sleeping the backoff delay between failures, up to `max_attempts`.
pub async fn reconnect_with_backoff<T, F, Fut>(mut connect: F, mut backoff: Backoff, max_attempts: u32) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..max_attempts {
        match connect().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let delay = backoff.next_delay();
                log::warn!("connect attempt {attempt} failed: {err}; retrying in {delay:?}");
                last_err = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| crate::foundation::CoinjoinError::transport("reconnect", "no attempts made")))
}

/// Merge every channel's subscription into one inbox. Per-channel order
/// is preserved by the forwarding tasks; cross-channel order is whatever
/// the network gives us, which is all the protocol requires.
pub async fn merge_subscriptions(
    channels: &[std::sync::Arc<dyn MessageChannel>],
) -> Result<tokio::sync::mpsc::Receiver<Incoming>> {
    let (tx, rx) = tokio::sync::mpsc::channel(1024);
    for channel in channels {
        let mut subscription = channel.subscribe().await?;
        let tx = tx.clone();
        let hostid = channel.hostid().to_string();
        tokio::spawn(async move {
            while let Some(item) = subscription.next().await {
                match item {
                    Ok(incoming) => {
                        if tx.send(incoming).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => log::warn!("channel {hostid} error: {err}"),
                }
            }
        });
    }
    Ok(rx)
}
