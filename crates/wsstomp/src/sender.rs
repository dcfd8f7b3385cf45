use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    switchyard_channels::{Channel, ChannelState, Message, Sender, StateCell},
    switchyard_common::{Error, Result},
    switchyard_config::SwitchyardConfig,
    tracing::{debug, warn},
};

use crate::{
    client::StompClient,
    frame::{self, Frame},
    settings,
};

pub struct WsStompSender {
    name: String,
    destination: String,
    client: Arc<StompClient>,
    state: StateCell,
}

impl WsStompSender {
    pub(crate) fn new(
        name: &str,
        config: &SwitchyardConfig,
        client: Arc<StompClient>,
    ) -> Result<Self> {
        let cfg = config.config_for_sender(name)?;
        let destination = settings::destination(&cfg, &format!("WS-STOMP sender [{name}]"))?;
        Ok(Self {
            name: name.to_string(),
            destination,
            client,
            state: StateCell::new(name),
        })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    fn to_frame(&self, message: Message) -> Frame {
        let destination = match message.effective_routing() {
            Some(routing) => format!("{}{routing}", self.destination),
            None => self.destination.clone(),
        };
        let routing_key = message.effective_routing().unwrap_or_default().to_string();
        let mut frame = Frame::new(frame::SEND)
            .header("destination", destination)
            .header("message_id", message.id.to_string())
            .header("content-type", message.content_type)
            .header("routing_key", routing_key)
            .header("ttl", message.ttl.to_string())
            .header("timestamp", now_millis().to_string());
        for (k, v) in message.headers {
            if frame.get(&k).is_none() {
                frame = frame.header(k, v);
            }
        }
        frame.body(message.payload)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
impl Channel for WsStompSender {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> &StateCell {
        &self.state
    }

    async fn open(&self) -> Result<()> {
        if !self.state.set(ChannelState::Open) {
            warn!(sender = %self.name, "WS-STOMP sender already open");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.state.set(ChannelState::Closed) {
            warn!(sender = %self.name, "WS-STOMP sender already closed");
        }
        Ok(())
    }
}

#[async_trait]
impl Sender for WsStompSender {
    async fn send(&self, message: Message) -> Result<()> {
        if !self.state.is_open() {
            return Err(Error::channel(&self.name, "sender is not open"));
        }
        let id = message.id;
        let frame = self.to_frame(message);
        debug!(sender = %self.name, id, destination = frame.get("destination").unwrap_or_default(), "sending message");
        self.client.transmit(frame)
    }
}
