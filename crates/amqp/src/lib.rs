//! AMQP 0-9-1 connector.
//!
//! Manages the broker connection only: `open` connects through `lapin` and
//! tracks connection errors, while senders and receivers are not available
//! yet and fail with `NotImplemented`.
//!
//! Connector settings: `url` (mandatory, `amqp://` or `amqps://`).
//! Channel settings: `type` (`queue` or `topic`, default `queue`),
//! `durable` (default true) and `name` (defaults to the channel name).

pub mod connector;
pub mod settings;

use std::sync::Arc;

use {
    switchyard_channels::{Connector, ConnectorRegistry},
    switchyard_common::Result,
    switchyard_config::SwitchyardConfig,
    tracing::info,
};

pub use {
    connector::AmqpConnector,
    settings::{AmqpChannelSettings, AmqpSettings, ChannelKind},
};

/// Connector type handled by this crate.
pub const CONNECTOR_TYPE: &str = "amqp";

/// Factory: build and initialize a connector for `name`.
pub async fn connector(name: String, config: Arc<SwitchyardConfig>) -> Result<Arc<dyn Connector>> {
    info!(connector = %name, "instantiating AMQP connector");
    let mut connector = AmqpConnector::new(name);
    connector.initialize(config).await?;
    Ok(Arc::new(connector))
}

/// Register [`connector`] under [`CONNECTOR_TYPE`].
pub fn register(registry: &ConnectorRegistry) {
    registry.register_connector_plugin(CONNECTOR_TYPE, connector);
}
