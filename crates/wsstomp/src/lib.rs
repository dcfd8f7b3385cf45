//! STOMP 1.2 over WebSocket connector.
//!
//! Connector settings (`connectors.<name>`):
//!
//! | key | default | |
//! |---|---|---|
//! | `url` | | mandatory, `ws://` or `wss://` |
//! | `username`, `password` | empty | STOMP `login`/`passcode` |
//! | `vhost` | url host | STOMP `host` header |
//! | `reconnectDelay` | 5000 | ms between reconnect attempts |
//! | `heartbeatIncoming`, `heartbeatOutgoing` | 0 | ms, 0 disables |
//! | `connectTimeout` | 30000 | ms for connect plus handshake |
//!
//! Senders and receivers need a `dest`. A message routing key other than
//! `/` is appended to it.

mod client;
mod connection;
pub mod connector;
pub mod frame;
pub mod receiver;
pub mod sender;
pub mod settings;

use std::sync::Arc;

use {
    switchyard_channels::{Connector, ConnectorRegistry},
    switchyard_common::Result,
    switchyard_config::SwitchyardConfig,
    tracing::info,
};

pub use {
    connector::WsStompConnector, receiver::WsStompReceiver, sender::WsStompSender,
    settings::WsStompSettings,
};

/// Connector type handled by this crate.
pub const CONNECTOR_TYPE: &str = "wsstomp";

/// Factory: build and initialize a connector for `name`.
pub async fn connector(name: String, config: Arc<SwitchyardConfig>) -> Result<Arc<dyn Connector>> {
    info!(connector = %name, "instantiating WS-STOMP connector");
    let mut connector = WsStompConnector::new(name);
    connector.initialize(config).await?;
    Ok(Arc::new(connector))
}

/// Register [`connector`] under [`CONNECTOR_TYPE`].
pub fn register(registry: &ConnectorRegistry) {
    registry.register_connector_plugin(CONNECTOR_TYPE, connector);
}
