use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    futures::future::join_all,
    switchyard_channels::{
        Channel, ChannelState, Connector, IdGenerator, KeyedPool, Receiver, Sender, StateCell,
        id_generator,
    },
    switchyard_common::{Error, Result},
    switchyard_config::SwitchyardConfig,
    tokio::{
        sync::{Mutex as AsyncMutex, oneshot, watch},
        task::JoinHandle,
    },
    tracing::{info, warn},
};

use crate::{
    client::StompClient, connection::connection_loop, receiver::WsStompReceiver,
    sender::WsStompSender, settings::WsStompSettings,
};

/// State reachable from the connection task.
pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) state: StateCell,
    pub(crate) client: Arc<StompClient>,
    pub(crate) receivers: KeyedPool<Arc<WsStompReceiver>>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    pub(crate) fn record_error(&self, e: &Error) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.to_string());
    }

    /// Unrecoverable failure: remember it, go to ERROR, fail a pending open.
    pub(crate) fn fail(&self, e: Error, opened: &mut Option<oneshot::Sender<Result<()>>>) {
        self.record_error(&e);
        self.state.set(ChannelState::Error);
        if let Some(tx) = opened.take() {
            let _ = tx.send(Err(e));
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

struct Running {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// STOMP 1.2 over WebSocket.
///
/// Keeps one connection open, reconnecting after `reconnectDelay` when the
/// transport drops. Receivers re-subscribe on every reconnect before the
/// connector reports `OPEN` again.
pub struct WsStompConnector {
    shared: Arc<Shared>,
    settings: Option<WsStompSettings>,
    config: Option<Arc<SwitchyardConfig>>,
    senders: KeyedPool<Arc<WsStompSender>>,
    running: AsyncMutex<Option<Running>>,
    ids: Arc<dyn IdGenerator>,
}

impl WsStompConnector {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            shared: Arc::new(Shared {
                state: StateCell::new(name.clone()),
                client: Arc::new(StompClient::new(name.clone())),
                receivers: KeyedPool::new(),
                last_error: Mutex::new(None),
                name,
            }),
            settings: None,
            config: None,
            senders: KeyedPool::new(),
            running: AsyncMutex::new(None),
            ids: id_generator(),
        }
    }

    /// Use `ids` for received messages that carry no numeric id.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn settings(&self) -> Option<&WsStompSettings> {
        self.settings.as_ref()
    }

    /// Last transport or broker error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error()
    }

    /// True while a transport connection is established.
    pub fn is_connected(&self) -> bool {
        self.shared.client.is_connected()
    }

    fn config(&self) -> Result<&Arc<SwitchyardConfig>> {
        self.config
            .as_ref()
            .ok_or_else(|| Error::channel(&self.shared.name, "connector is not initialized"))
    }

    async fn close_channels(&self) {
        let senders = self.senders.drain().await;
        let receivers = self.shared.receivers.drain().await;
        let closing_senders = senders.into_iter().map(|(name, s)| async move {
            if let Err(e) = s.close().await {
                warn!(connector = %self.shared.name, sender = %name, error = %e, "failed to close sender");
            }
        });
        let closing_receivers = receivers.into_iter().map(|(name, r)| async move {
            if let Err(e) = r.close().await {
                warn!(connector = %self.shared.name, receiver = %name, error = %e, "failed to close receiver");
            }
        });
        futures::join!(join_all(closing_senders), join_all(closing_receivers));
    }
}

#[async_trait]
impl Channel for WsStompConnector {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn state(&self) -> &StateCell {
        &self.shared.state
    }

    async fn open(&self) -> Result<()> {
        let settings = self
            .settings
            .clone()
            .ok_or_else(|| Error::channel(&self.shared.name, "connector is not initialized"))?;
        let mut running = self.running.lock().await;

        if self.shared.state.is_open() {
            warn!(connector = %self.shared.name, "WS-STOMP connector already open");
            return Ok(());
        }

        // Still reconnecting from an earlier open: wait for the outcome.
        if let Some(r) = running.as_ref()
            && !r.handle.is_finished()
        {
            drop(running);
            let state = self
                .shared
                .state
                .wait_until(
                    |s| s != ChannelState::Closed,
                    "OPEN",
                    settings.connect_timeout + settings.reconnect_delay,
                )
                .await?;
            return match state {
                ChannelState::Open => Ok(()),
                _ => Err(self.open_failure()),
            };
        }

        info!(connector = %self.shared.name, url = %settings.url, "opening WS-STOMP connector");
        let (opened_tx, opened_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(connection_loop(
            Arc::clone(&self.shared),
            settings,
            opened_tx,
            shutdown_rx,
        ));
        *running = Some(Running {
            handle,
            shutdown: shutdown_tx,
        });
        // close() must be able to cancel a handshake still in flight.
        drop(running);

        match opened_rx.await {
            Ok(Ok(())) => {
                info!(connector = %self.shared.name, "WS-STOMP connector open");
                Ok(())
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Err(self.open_failure()),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        let Some(task) = running.take() else {
            if self.shared.state.get() == ChannelState::Closed {
                warn!(connector = %self.shared.name, "WS-STOMP connector already closed");
            }
            self.close_channels().await;
            self.shared.state.set(ChannelState::Closed);
            return Ok(());
        };

        info!(connector = %self.shared.name, "closing WS-STOMP connector");
        self.close_channels().await;
        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            warn!(connector = %self.shared.name, error = %e, "connection task ended abnormally");
        }
        self.shared.client.detach();
        self.shared.state.set(ChannelState::Closed);
        Ok(())
    }
}

impl WsStompConnector {
    fn open_failure(&self) -> Error {
        Error::channel(
            &self.shared.name,
            self.shared
                .last_error()
                .unwrap_or_else(|| "error opening WS-STOMP connector".to_string()),
        )
    }
}

#[async_trait]
impl Connector for WsStompConnector {
    async fn initialize(&mut self, config: Arc<SwitchyardConfig>) -> Result<()> {
        let cfg = config.config_for_connector(&self.shared.name)?;
        let settings = WsStompSettings::from_config(&cfg, &self.shared.name)?;
        info!(connector = %self.shared.name, url = %settings.url, "WS-STOMP connector initialized");
        self.settings = Some(settings);
        self.config = Some(config);
        Ok(())
    }

    async fn sender(&self, name: &str) -> Result<Arc<dyn Sender>> {
        let config = Arc::clone(self.config()?);
        let mut slot = self.senders.lock_slot(name).await;
        if let Some(existing) = slot.as_ref() {
            if existing.state().is_open() {
                return Ok(Arc::clone(existing) as Arc<dyn Sender>);
            }
            warn!(connector = %self.shared.name, sender = %name, "pooled sender is not open, replacing it");
            existing.close().await?;
            *slot = None;
        }
        let sender = Arc::new(WsStompSender::new(
            name,
            &config,
            Arc::clone(&self.shared.client),
        )?);
        sender.open().await?;
        *slot = Some(Arc::clone(&sender));
        Ok(sender)
    }

    async fn receiver(&self, name: &str) -> Result<Arc<dyn Receiver>> {
        let config = Arc::clone(self.config()?);
        let mut slot = self.shared.receivers.lock_slot(name).await;
        if let Some(existing) = slot.as_ref() {
            if existing.state().is_open() {
                return Ok(Arc::clone(existing) as Arc<dyn Receiver>);
            }
            warn!(connector = %self.shared.name, receiver = %name, "pooled receiver is not open, replacing it");
            existing.close().await?;
            *slot = None;
        }
        let receiver = Arc::new(WsStompReceiver::new(
            name,
            &config,
            Arc::clone(&self.shared.client),
            Arc::clone(&self.ids),
        )?);
        receiver.open().await?;
        *slot = Some(Arc::clone(&receiver));
        Ok(receiver)
    }
}
