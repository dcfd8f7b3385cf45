use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use {
    async_trait::async_trait,
    futures::future::join_all,
    switchyard_channels::{
        Channel, ChannelState, IdGenerator, Message, MessageObserver, Receiver, StateCell,
        Subscription,
    },
    switchyard_common::{Error, Result},
    switchyard_config::SwitchyardConfig,
    tokio::sync::mpsc,
    tracing::{debug, info, trace, warn},
};

use crate::{
    client::{Delivery, StompClient},
    frame::Frame,
    sender::now_millis,
    settings,
};

/// Headers looked up, in order, for a numeric message id.
const ID_HEADERS: [&str; 4] = ["amqp-message-id", "message_id", "message-id", "id"];

/// One `subscribe()` call. Survives reconnects; only `handle` changes.
struct Descriptor {
    key: u64,
    destination: String,
    routing: Option<String>,
    handle: Mutex<Option<String>>,
    deliver: mpsc::UnboundedSender<Delivery>,
}

impl Descriptor {
    fn take_handle(&self) -> Option<String> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn attach(&self, client: &StompClient) -> Result<()> {
        let id = client.subscribe(&self.destination, self.deliver.clone())?;
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
        Ok(())
    }

    fn detach(&self, client: &StompClient, receiver: &str) {
        if let Some(id) = self.take_handle()
            && let Err(e) = client.unsubscribe(&id)
        {
            warn!(receiver, subscription = %id, error = %e, "failed to unsubscribe");
        }
    }
}

type Descriptors = Arc<Mutex<Vec<Arc<Descriptor>>>>;

pub struct WsStompReceiver {
    name: String,
    destination: String,
    client: Arc<StompClient>,
    state: StateCell,
    descriptors: Descriptors,
    next_key: AtomicU64,
    ids: Arc<dyn IdGenerator>,
}

impl WsStompReceiver {
    pub(crate) fn new(
        name: &str,
        config: &SwitchyardConfig,
        client: Arc<StompClient>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        let cfg = config.config_for_receiver(name)?;
        let destination = settings::destination(&cfg, &format!("WS-STOMP receiver [{name}]"))?;
        Ok(Self {
            name: name.to_string(),
            destination,
            client,
            state: StateCell::new(name),
            descriptors: Arc::new(Mutex::new(Vec::new())),
            next_key: AtomicU64::new(1),
            ids,
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Live `subscribe()` registrations.
    pub fn subscription_count(&self) -> usize {
        self.descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn snapshot(&self) -> Vec<Arc<Descriptor>> {
        self.descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Spawn the task that feeds `observer` in arrival order, off the
/// connection's read path.
fn spawn_dispatcher(
    receiver: String,
    routing: Option<String>,
    observer: Arc<dyn MessageObserver>,
    ids: Arc<dyn IdGenerator>,
) -> mpsc::UnboundedSender<Delivery> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            match delivery {
                Delivery::Frame(frame) => {
                    if let Some(message) =
                        to_message(&receiver, frame, routing.as_deref(), ids.as_ref())
                    {
                        observer.next(message);
                    }
                },
                Delivery::Complete => {
                    observer.complete();
                    break;
                },
            }
        }
        trace!(receiver = %receiver, "dispatcher finished");
    });
    tx
}

/// Convert a `MESSAGE` frame; `None` when its time-to-live has passed.
fn to_message(
    receiver: &str,
    frame: Frame,
    routing: Option<&str>,
    ids: &dyn IdGenerator,
) -> Option<Message> {
    let id = ID_HEADERS
        .iter()
        .filter_map(|h| frame.get(h))
        .find_map(|v| v.trim().parse::<u64>().ok())
        .unwrap_or_else(|| ids.next_id());
    let ttl = frame
        .get("ttl")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(Message::DEFAULT_TTL);

    if let Some(sent) = frame.get("timestamp").and_then(|v| v.parse::<u64>().ok())
        && frame.get("ttl").is_some()
        && sent.saturating_add(u64::from(ttl) * 1000) < now_millis()
    {
        let err = Error::TimeToLiveExpired { id };
        warn!(receiver, id, code = %err.code(), "{err}, discarding");
        return None;
    }

    let content_type = frame
        .get("content-type")
        .unwrap_or(Message::DEFAULT_CONTENT_TYPE)
        .to_string();
    let routing = frame
        .get("routing_key")
        .filter(|r| !r.is_empty())
        .or(routing)
        .unwrap_or(Message::DEFAULT_ROUTING)
        .to_string();
    let Frame { headers, body, .. } = frame;
    let mut map = std::collections::BTreeMap::new();
    for (k, v) in headers {
        map.entry(k).or_insert(v);
    }
    Some(Message {
        id,
        content_type,
        headers: map,
        payload: body,
        routing,
        ttl,
    })
}

#[async_trait]
impl Channel for WsStompReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> &StateCell {
        &self.state
    }

    async fn open(&self) -> Result<()> {
        if !self.state.set(ChannelState::Open) {
            warn!(receiver = %self.name, "WS-STOMP receiver already open");
        }
        Ok(())
    }

    /// Ends every subscription and completes its observer.
    async fn close(&self) -> Result<()> {
        let descriptors: Vec<_> = self
            .descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for desc in descriptors {
            debug!(receiver = %self.name, destination = %desc.destination, "ending subscription");
            desc.detach(&self.client, &self.name);
            let _ = desc.deliver.send(Delivery::Complete);
        }
        if self.state.set(ChannelState::Closed) {
            info!(receiver = %self.name, "WS-STOMP receiver closed");
        } else {
            warn!(receiver = %self.name, "WS-STOMP receiver already closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Receiver for WsStompReceiver {
    async fn subscribe(
        &self,
        observer: Arc<dyn MessageObserver>,
        routing: Option<&str>,
    ) -> Result<Subscription> {
        if !self.state.is_open() {
            return Err(Error::channel(&self.name, "receiver is not open"));
        }
        let routing = routing.filter(|r| !r.is_empty() && *r != Message::DEFAULT_ROUTING);
        let destination = match routing {
            Some(r) => format!("{}{r}", self.destination),
            None => self.destination.clone(),
        };
        let deliver = spawn_dispatcher(
            self.name.clone(),
            routing.map(str::to_string),
            observer,
            Arc::clone(&self.ids),
        );
        let desc = Arc::new(Descriptor {
            key: self.next_key.fetch_add(1, Ordering::Relaxed),
            destination: destination.clone(),
            routing: routing.map(str::to_string),
            handle: Mutex::new(None),
            deliver,
        });
        desc.attach(&self.client)?;
        self.descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&desc));
        info!(receiver = %self.name, destination = %destination, "subscribed");

        let descriptors = Arc::clone(&self.descriptors);
        let client = Arc::clone(&self.client);
        let receiver = self.name.clone();
        let key = desc.key;
        Ok(Subscription::new(key, destination, move || {
            descriptors
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|d| d.key != key);
            desc.detach(&client, &receiver);
            debug!(receiver = %receiver, subscription = key, "unsubscribed");
        }))
    }

    async fn recover_after_reconnect(&self) {
        let descriptors = self.snapshot();
        if descriptors.is_empty() {
            return;
        }
        info!(receiver = %self.name, count = descriptors.len(), "recovering subscriptions after reconnect");
        let recoveries = descriptors.into_iter().map(|desc| async move {
            desc.detach(&self.client, &self.name);
            match desc.attach(&self.client) {
                Ok(()) => debug!(
                    receiver = %self.name,
                    destination = %desc.destination,
                    routing = desc.routing.as_deref().unwrap_or(""),
                    "subscription recovered"
                ),
                Err(e) => warn!(
                    receiver = %self.name,
                    destination = %desc.destination,
                    error = %e,
                    "failed to recover subscription"
                ),
            }
        });
        join_all(recoveries).await;
    }
}
