use std::{fmt, str::FromStr};

use {
    switchyard_common::{Error, Result},
    switchyard_config::{ConfigMap, SettingsExt},
};

/// Connector settings read from `connectors.<name>`.
#[derive(Clone)]
pub struct AmqpSettings {
    pub url: String,
}

impl AmqpSettings {
    pub fn from_config(cfg: &ConfigMap, connector: &str) -> Result<Self> {
        let owner = format!("AMQP connector [{connector}]");
        let url = cfg.require_str("url", &owner)?;
        if !(url.starts_with("amqp://") || url.starts_with("amqps://")) {
            return Err(Error::config(format!(
                "url for {owner} must use the amqp or amqps scheme"
            )));
        }
        Ok(Self { url })
    }

    /// The url with any password replaced, for logs.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        match rest.split_once('@') {
            Some((userinfo, host)) => {
                let user = userinfo.split(':').next().unwrap_or_default();
                format!("{scheme}://{user}:***@{host}")
            },
            None => self.url.clone(),
        }
    }
}

impl fmt::Debug for AmqpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpSettings")
            .field("url", &self.redacted_url())
            .finish()
    }
}

/// How a sender or receiver addresses the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelKind {
    #[default]
    Queue,
    Topic,
}

impl FromStr for ChannelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(Self::Queue),
            "topic" => Ok(Self::Topic),
            other => Err(Error::config(format!(
                "unknown AMQP channel type [{other}], expected queue or topic"
            ))),
        }
    }
}

/// Sender and receiver settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpChannelSettings {
    pub kind: ChannelKind,
    pub durable: bool,
    /// Queue or exchange name.
    pub name: String,
}

impl AmqpChannelSettings {
    pub fn from_config(cfg: &ConfigMap, channel: &str) -> Result<Self> {
        let owner = format!("AMQP channel [{channel}]");
        Ok(Self {
            kind: cfg
                .str_value("type")
                .map(str::parse::<ChannelKind>)
                .transpose()?
                .unwrap_or_default(),
            durable: cfg.bool_or("durable", true, &owner)?,
            name: cfg.str_value("name").unwrap_or(channel).to_string(),
        })
    }
}
