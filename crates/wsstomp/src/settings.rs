use std::{fmt, time::Duration};

use {
    switchyard_common::{Error, Result},
    switchyard_config::{ConfigMap, SettingsExt},
    url::Url,
};

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Connector settings read from `connectors.<name>`.
#[derive(Clone)]
pub struct WsStompSettings {
    pub url: Url,
    pub username: String,
    pub password: String,
    /// Broker virtual host, sent as the STOMP `host` header.
    pub vhost: Option<String>,
    pub reconnect_delay: Duration,
    pub heartbeat_incoming: Duration,
    pub heartbeat_outgoing: Duration,
    pub connect_timeout: Duration,
}

impl WsStompSettings {
    pub fn from_config(cfg: &ConfigMap, connector: &str) -> Result<Self> {
        let owner = format!("WS-STOMP connector [{connector}]");
        let raw_url = cfg.require_str("url", &owner)?;
        let url = Url::parse(&raw_url)
            .map_err(|e| Error::config(format!("invalid url [{raw_url}] for {owner}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "url [{raw_url}] for {owner} must use the ws or wss scheme"
            )));
        }
        let millis = |key: &str, default: u64| -> Result<Duration> {
            cfg.u64_or(key, default, &owner).map(Duration::from_millis)
        };
        Ok(Self {
            url,
            username: cfg.str_value("username").unwrap_or_default().to_string(),
            password: cfg.str_value("password").unwrap_or_default().to_string(),
            vhost: cfg.str_value("vhost").map(str::to_string),
            reconnect_delay: millis("reconnectDelay", DEFAULT_RECONNECT_DELAY_MS)?,
            heartbeat_incoming: millis("heartbeatIncoming", 0)?,
            heartbeat_outgoing: millis("heartbeatOutgoing", 0)?,
            connect_timeout: millis("connectTimeout", DEFAULT_CONNECT_TIMEOUT_MS)?,
        })
    }
}

impl fmt::Debug for WsStompSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsStompSettings")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("vhost", &self.vhost)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("heartbeat_incoming", &self.heartbeat_incoming)
            .field("heartbeat_outgoing", &self.heartbeat_outgoing)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Sender and receiver settings: the base destination.
pub fn destination(cfg: &ConfigMap, owner: &str) -> Result<String> {
    cfg.require_str("dest", owner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    fn map(v: serde_json::Value) -> ConfigMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn defaults() {
        let s = WsStompSettings::from_config(&map(json!({"url": "ws://localhost:15674/ws"})), "ws")
            .unwrap();
        assert_eq!(s.reconnect_delay, Duration::from_millis(5000));
        assert_eq!(s.heartbeat_incoming, Duration::ZERO);
        assert_eq!(s.heartbeat_outgoing, Duration::ZERO);
        assert_eq!(s.connect_timeout, Duration::from_secs(30));
        assert!(s.username.is_empty());
        assert!(s.vhost.is_none());
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let s = WsStompSettings::from_config(
            &map(json!({
                "url": "wss://broker/ws",
                "username": "guest",
                "password": "secret",
                "reconnectDelay": "250",
                "heartbeatIncoming": 4000
            })),
            "ws",
        )
        .unwrap();
        assert_eq!(s.reconnect_delay, Duration::from_millis(250));
        assert_eq!(s.heartbeat_incoming, Duration::from_millis(4000));
        assert!(!format!("{s:?}").contains("secret"));
    }

    #[rstest]
    #[case::missing(json!({}))]
    #[case::empty(json!({"url": ""}))]
    #[case::not_a_url(json!({"url": "not a url"}))]
    #[case::wrong_scheme(json!({"url": "http://broker/ws"}))]
    #[case::bad_delay(json!({"url": "ws://b/ws", "reconnectDelay": "soon"}))]
    fn invalid_settings_are_config_errors(#[case] cfg: serde_json::Value) {
        let err = WsStompSettings::from_config(&map(cfg), "ws").unwrap_err();
        assert!(err.is_config(), "{err}");
    }

    #[test]
    fn destination_is_mandatory() {
        let err = destination(&map(json!({"connector": "ws"})), "WS-STOMP sender [s]").unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: missing configuration parameter [dest] for WS-STOMP sender [s]"
        );
    }
}
