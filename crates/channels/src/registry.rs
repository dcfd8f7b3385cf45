//! Connector type → factory mapping and the resolution algorithm.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, RwLock},
};

use {
    futures::future::BoxFuture,
    serde_json::Value,
    switchyard_common::{Error, Result},
    switchyard_config::SwitchyardConfig,
    tracing::debug,
};

use crate::channel::Connector;

/// Builds and initializes a connector bound to a logical name.
pub type ConnectorFactory = Arc<
    dyn Fn(String, Arc<SwitchyardConfig>) -> BoxFuture<'static, Result<Arc<dyn Connector>>>
        + Send
        + Sync,
>;

/// Registry of connector factories, keyed by connector type.
#[derive(Default)]
pub struct ConnectorRegistry {
    factories: RwLock<HashMap<String, ConnectorFactory>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `connector_type`. A later registration of the
    /// same type replaces the earlier one.
    pub fn register_connector_plugin<F, Fut>(&self, connector_type: impl Into<String>, factory: F)
    where
        F: Fn(String, Arc<SwitchyardConfig>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Connector>>> + Send + 'static,
    {
        let factory: ConnectorFactory = Arc::new(move |name, config| Box::pin(factory(name, config)));
        self.register_factory(connector_type, factory);
    }

    pub fn register_factory(&self, connector_type: impl Into<String>, factory: ConnectorFactory) {
        let connector_type = connector_type.into();
        debug!(connector_type = %connector_type, "registered connector plugin");
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connector_type, factory);
    }

    pub fn contains(&self, connector_type: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(connector_type)
    }

    /// Registered types, sorted.
    pub fn types(&self) -> Vec<String> {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
        let mut types: Vec<_> = factories.keys().cloned().collect();
        types.sort();
        types
    }

    fn factory(&self, key: &str) -> Option<ConnectorFactory> {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Build a fresh connector for `name`.
    ///
    /// The factory is chosen by the connector's `type` setting first, then
    /// by `name` itself. Nothing is cached and nothing is opened.
    pub async fn load_connector(
        &self,
        name: &str,
        config: Arc<SwitchyardConfig>,
    ) -> Result<Arc<dyn Connector>> {
        let settings = config.config_for_connector(name)?;
        let connector_type = settings.get("type").and_then(Value::as_str);

        let factory = connector_type
            .and_then(|t| self.factory(t))
            .or_else(|| self.factory(name))
            .ok_or_else(|| {
                Error::config(format!(
                    "no registered factory for connector [{name}] of type [{}]",
                    connector_type.unwrap_or("<none>")
                ))
            })?;

        debug!(connector = %name, connector_type = connector_type.unwrap_or(name), "loading connector");
        factory(name.to_string(), config).await
    }
}
