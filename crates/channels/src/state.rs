//! Observable channel state with replay of the latest value.

use std::{
    fmt,
    sync::Mutex,
    time::Duration,
};

use {
    switchyard_common::{Error, Result},
    tokio::sync::mpsc,
    tracing::trace,
};

use crate::channel::Channel;

/// Upper bound used when a caller does not supply its own wait timeout.
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle state of a channel, connector, sender or receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Cannot transport data.
    #[default]
    Closed,
    /// Usable.
    Open,
    /// Failed; stays here until closed and reopened (or replaced).
    Error,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::Error => "ERROR",
        })
    }
}

struct Inner {
    current: ChannelState,
    subscribers: Vec<mpsc::UnboundedSender<ChannelState>>,
}

/// The latest state of a channel plus the list of parties watching it.
///
/// Subscribers first receive the current value, then every transition in
/// the order it happened. Publishing never blocks.
pub struct StateCell {
    name: String,
    inner: Mutex<Inner>,
}

impl StateCell {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                current: ChannelState::Closed,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> ChannelState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).current
    }

    pub fn is_open(&self) -> bool {
        self.get() == ChannelState::Open
    }

    /// Move to `next`. Returns `false` (and notifies nobody) when the state
    /// is already `next`.
    pub fn set(&self, next: ChannelState) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.current == next {
            return false;
        }
        trace!(channel = %self.name, from = %inner.current, to = %next, "state transition");
        inner.current = next;
        inner.subscribers.retain(|tx| tx.send(next).is_ok());
        true
    }

    /// Move to `next` only if the current state is `from`.
    pub fn transition(&self, from: ChannelState, next: ChannelState) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.current != from || from == next {
            return false;
        }
        trace!(channel = %self.name, from = %from, to = %next, "state transition");
        inner.current = next;
        inner.subscribers.retain(|tx| tx.send(next).is_ok());
        true
    }

    /// Start watching. The current value is the first item yielded.
    pub fn subscribe(&self) -> StateWatch {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Same critical section as the push: no transition can slip between.
        let _ = tx.send(inner.current);
        inner.subscribers.push(tx);
        StateWatch { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    /// Wait until `accept` returns true for the state, bounded by `timeout`.
    pub async fn wait_until(
        &self,
        accept: impl Fn(ChannelState) -> bool,
        expected: &str,
        timeout: Duration,
    ) -> Result<ChannelState> {
        let mut watch = self.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            while let Some(state) = watch.recv().await {
                if accept(state) {
                    return Some(state);
                }
            }
            None
        })
        .await;
        match waited {
            Ok(Some(state)) => Ok(state),
            Ok(None) | Err(_) => Err(Error::Timeout {
                name: self.name.clone(),
                state: expected.to_string(),
                after: timeout,
            }),
        }
    }

    /// Wait until the state equals `target`, bounded by `timeout`.
    pub async fn wait_for(&self, target: ChannelState, timeout: Duration) -> Result<()> {
        self.wait_until(|s| s == target, &target.to_string(), timeout)
            .await
            .map(|_| ())
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("name", &self.name)
            .field("state", &self.get())
            .finish()
    }
}

/// A subscription to a [`StateCell`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct StateWatch {
    rx: mpsc::UnboundedReceiver<ChannelState>,
}

impl StateWatch {
    /// Next observed state; `None` once the cell is gone.
    pub async fn recv(&mut self) -> Option<ChannelState> {
        self.rx.recv().await
    }

    /// A state already published, without waiting.
    pub fn try_recv(&mut self) -> Option<ChannelState> {
        self.rx.try_recv().ok()
    }
}

/// Wait for `channel` to reach `target`, failing after `timeout`.
pub async fn wait_for_state(
    channel: &(impl Channel + ?Sized),
    target: ChannelState,
    timeout: Duration,
) -> Result<()> {
    channel.state().wait_for(target, timeout).await
}
