//! Capability traits: every transport implements exactly the ones it supports.

use std::{fmt, sync::Arc};

use {
    async_trait::async_trait, switchyard_common::Result, switchyard_config::SwitchyardConfig,
    tokio::sync::mpsc,
};

use crate::{message::Message, state::StateCell};

/// Anything with an open/close lifecycle and an observable state.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Name used in configuration and logs.
    fn name(&self) -> &str;

    fn state(&self) -> &StateCell;

    /// Open the channel. Opening an open channel only logs a warning.
    async fn open(&self) -> Result<()>;

    /// Close the channel. Closing a closed channel only logs a warning.
    async fn close(&self) -> Result<()>;
}

/// Outgoing direction.
#[async_trait]
pub trait Sender: Channel {
    async fn send(&self, message: Message) -> Result<()>;
}

/// Incoming direction.
#[async_trait]
pub trait Receiver: Channel {
    /// Deliver messages arriving on this receiver's destination (optionally
    /// narrowed by `routing`) to `observer` until the subscription is
    /// cancelled or the receiver closes.
    async fn subscribe(
        &self,
        observer: Arc<dyn MessageObserver>,
        routing: Option<&str>,
    ) -> Result<Subscription>;

    /// Re-attach every subscription after the transport reconnected.
    /// Failures are logged, never returned.
    async fn recover_after_reconnect(&self) {}
}

/// Owns one transport connection and pools senders and receivers by name.
#[async_trait]
pub trait Connector: Channel {
    /// Read and validate connector settings. Must not touch the network.
    async fn initialize(&mut self, config: Arc<SwitchyardConfig>) -> Result<()>;

    /// The pooled sender `name`, created and opened on first request.
    async fn sender(&self, name: &str) -> Result<Arc<dyn Sender>>;

    /// The pooled receiver `name`, created and opened on first request.
    async fn receiver(&self, name: &str) -> Result<Arc<dyn Receiver>>;
}

/// Callback side of a subscription. Only `next` is mandatory.
pub trait MessageObserver: Send + Sync {
    fn next(&self, message: Message);

    /// The subscription ended because its receiver closed.
    fn complete(&self) {}
}

/// Adapts a closure into a [`MessageObserver`].
pub struct FnObserver<F>(pub F);

impl<F> MessageObserver for FnObserver<F>
where
    F: Fn(Message) + Send + Sync,
{
    fn next(&self, message: Message) {
        (self.0)(message);
    }
}

pub fn observer_fn<F>(f: F) -> Arc<dyn MessageObserver>
where
    F: Fn(Message) + Send + Sync + 'static,
{
    Arc::new(FnObserver(f))
}

impl MessageObserver for mpsc::UnboundedSender<Message> {
    fn next(&self, message: Message) {
        // Receiver side gone means nobody is listening anymore.
        let _ = self.send(message);
    }
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// Application-visible handle of a subscription.
///
/// Stays valid across transport reconnects. Dropping the handle keeps the
/// subscription alive; call [`Subscription::unsubscribe`] to end it.
pub struct Subscription {
    id: u64,
    destination: String,
    cancel: Option<CancelFn>,
}

impl Subscription {
    pub fn new(id: u64, destination: impl Into<String>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            destination: destination.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    #[test]
    fn unsubscribe_runs_cancel_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = Subscription::new(3, "/queue/a", move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(sub.id(), 3);
        assert_eq!(sub.destination(), "/queue/a");
        sub.unsubscribe();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_does_not_cancel() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let c = Arc::clone(&cancelled);
        drop(Subscription::new(1, "/q", move || c.store(true, Ordering::SeqCst)));
        assert!(!cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn closure_observer_receives_messages() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let obs = observer_fn(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        obs.next(Message::default());
        obs.complete();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mpsc_observer_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let msg = Message::builder().id(42).build().unwrap();
        tx.next(msg);
        assert_eq!(rx.try_recv().ok().map(|m| m.id), Some(42));
    }
}
