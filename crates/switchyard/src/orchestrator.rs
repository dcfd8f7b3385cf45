//! `Switchyard`: owns the active configuration and the live connectors.

use std::sync::{Arc, RwLock};

use {
    futures::future::join_all,
    serde_json::Value,
    switchyard_channels::{
        ChannelState, Connector, ConnectorRegistry, KeyedPool, Receiver, Sender,
    },
    switchyard_common::{Error, Result},
    switchyard_config::{SettingsExt, SwitchyardConfig, Vars},
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

/// Entry point of the library.
///
/// Resolves senders and receivers by name through the active configuration,
/// loading and opening the connector behind them on first use. One
/// connector instance exists per name at any time.
pub struct Switchyard {
    registry: ConnectorRegistry,
    config: RwLock<Option<Arc<SwitchyardConfig>>>,
    connectors: KeyedPool<Arc<dyn Connector>>,
    client_id: RwLock<String>,
    /// Serializes `configure` and `close`.
    reconfigure: Mutex<()>,
}

impl Default for Switchyard {
    fn default() -> Self {
        Self::new()
    }
}

impl Switchyard {
    pub fn new() -> Self {
        Self::with_registry(ConnectorRegistry::new())
    }

    pub fn with_registry(registry: ConnectorRegistry) -> Self {
        Self {
            registry,
            config: RwLock::new(None),
            connectors: KeyedPool::new(),
            client_id: RwLock::new(uuid::Uuid::new_v4().to_string()),
            reconfigure: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Shorthand for [`ConnectorRegistry::register_connector_plugin`].
    pub fn register_connector_plugin<F, Fut>(&self, connector_type: impl Into<String>, factory: F)
    where
        F: Fn(String, Arc<SwitchyardConfig>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Connector>>> + Send + 'static,
    {
        self.registry
            .register_connector_plugin(connector_type, factory);
    }

    /// Identifier of this client, a random UUID unless set explicitly.
    pub fn client_id(&self) -> String {
        self.client_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_client_id(&self, client_id: impl Into<String>) {
        *self.client_id.write().unwrap_or_else(|e| e.into_inner()) = client_id.into();
    }

    /// Install a configuration built from `tree`, resolving `${name}`
    /// placeholders against `vars`.
    ///
    /// Without `reload` an already installed configuration is kept and
    /// returned. With `reload` a new instance is always installed, and every
    /// live connector whose settings (or whose senders' and receivers'
    /// settings) differ under the new tree is closed and evicted.
    pub async fn configure(
        &self,
        tree: Value,
        vars: &Vars,
        reload: bool,
    ) -> Result<Arc<SwitchyardConfig>> {
        let _guard = self.reconfigure.lock().await;
        if !reload && let Some(current) = self.current_config() {
            debug!("configuration already installed, keeping it");
            return Ok(current);
        }
        let next = Arc::new(SwitchyardConfig::new(tree, vars));
        self.install(next, reload).await
    }

    /// Same as [`Self::configure`] for an already built configuration.
    pub async fn configure_with(
        &self,
        config: SwitchyardConfig,
        reload: bool,
    ) -> Result<Arc<SwitchyardConfig>> {
        let _guard = self.reconfigure.lock().await;
        if !reload && let Some(current) = self.current_config() {
            return Ok(current);
        }
        self.install(Arc::new(config), reload).await
    }

    async fn install(
        &self,
        next: Arc<SwitchyardConfig>,
        reload: bool,
    ) -> Result<Arc<SwitchyardConfig>> {
        let previous = self
            .config
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(Arc::clone(&next));

        if let (true, Some(previous)) = (reload, previous) {
            self.evict_changed(&previous, &next).await;
        }
        info!(
            connectors = next.names(switchyard_config::Section::Connectors).len(),
            reload, "configuration installed"
        );
        Ok(next)
    }

    async fn evict_changed(&self, previous: &SwitchyardConfig, next: &SwitchyardConfig) {
        let changed: Vec<String> = self
            .connectors
            .keys()
            .into_iter()
            .filter(|name| previous.connector_binding(name) != next.connector_binding(name))
            .collect();

        let closing = changed.into_iter().map(|name| async move {
            if let Some(connector) = self.connectors.remove(&name).await {
                info!(connector = %name, "configuration changed, closing connector");
                if let Err(e) = connector.close().await {
                    warn!(connector = %name, error = %e, "failed to close connector on reload");
                }
            }
        });
        join_all(closing).await;
    }

    fn current_config(&self) -> Option<Arc<SwitchyardConfig>> {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The installed configuration.
    pub fn config(&self) -> Result<Arc<SwitchyardConfig>> {
        self.current_config()
            .ok_or_else(|| Error::config("switchyard is not configured"))
    }

    /// The live connector `name`, loaded and opened on first request.
    ///
    /// A cached connector that went to `ERROR` is closed and replaced.
    pub async fn connector(&self, name: &str) -> Result<Arc<dyn Connector>> {
        let mut slot = self.connectors.lock_slot(name).await;
        if let Some(existing) = slot.as_ref() {
            if existing.state().get() != ChannelState::Error {
                return Ok(Arc::clone(existing));
            }
            warn!(connector = %name, "cached connector is in error, replacing it");
            if let Err(e) = existing.close().await {
                warn!(connector = %name, error = %e, "failed to close broken connector");
            }
            *slot = None;
        }

        // Read under the slot lock so a concurrent reload cannot leave a
        // connector bound to a superseded configuration in the cache.
        let config = self.config()?;
        let connector = self.registry.load_connector(name, config).await?;
        if let Err(e) = connector.open().await {
            if let Err(close_err) = connector.close().await {
                debug!(connector = %name, error = %close_err, "close after failed open");
            }
            return Err(e);
        }
        info!(connector = %name, "connector opened");
        *slot = Some(Arc::clone(&connector));
        Ok(connector)
    }

    /// The sender `name`, through the connector its settings point to.
    pub async fn sender(&self, name: &str) -> Result<Arc<dyn Sender>> {
        let settings = self.config()?.config_for_sender(name)?;
        let connector = settings.require_str("connector", &format!("sender [{name}]"))?;
        self.connector(&connector).await?.sender(name).await
    }

    /// The receiver `name`, through the connector its settings point to.
    pub async fn receiver(&self, name: &str) -> Result<Arc<dyn Receiver>> {
        let settings = self.config()?.config_for_receiver(name)?;
        let connector = settings.require_str("connector", &format!("receiver [{name}]"))?;
        self.connector(&connector).await?.receiver(name).await
    }

    /// Names of the connectors currently cached, sorted.
    pub fn live_connectors(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .connectors
            .values()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Close every live connector and forget the configuration.
    ///
    /// Failures are logged and never stop the remaining closes.
    pub async fn close(&self) {
        let _guard = self.reconfigure.lock().await;
        let drained = self.connectors.drain().await;
        let closing = drained.into_iter().map(|(name, connector)| async move {
            match connector.close().await {
                Ok(()) => debug!(connector = %name, "connector closed"),
                Err(e) => warn!(connector = %name, error = %e, "failed to close connector"),
            }
        });
        join_all(closing).await;
        self.config
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        info!("switchyard closed");
    }
}
