#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    switchyard::{
        Channel, ChannelState, Connector, Error, Message, MessageObserver, Receiver, Result,
        Sender, StateCell, Subscription, Switchyard, SwitchyardConfig, Vars,
    },
    switchyard_channels::KeyedPool,
    switchyard_config::SettingsExt,
};

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

struct MockConnector {
    name: String,
    state: StateCell,
    fail_open: bool,
    fail_close: bool,
    counters: Arc<Counters>,
    senders: KeyedPool<Arc<MockChannel>>,
    receivers: KeyedPool<Arc<MockChannel>>,
}

impl MockConnector {
    async fn build(
        name: String,
        config: Arc<SwitchyardConfig>,
        counters: Arc<Counters>,
    ) -> Result<Arc<dyn Connector>> {
        counters.created.fetch_add(1, Ordering::SeqCst);
        let mut c = Self {
            state: StateCell::new(name.clone()),
            name,
            fail_open: false,
            fail_close: false,
            counters,
            senders: KeyedPool::new(),
            receivers: KeyedPool::new(),
        };
        c.initialize(config).await?;
        Ok(Arc::new(c))
    }

    async fn pooled(&self, pool: &KeyedPool<Arc<MockChannel>>, name: &str) -> Arc<MockChannel> {
        let mut slot = pool.lock_slot(name).await;
        if let Some(ch) = slot.as_ref().filter(|ch| ch.state.is_open()) {
            return Arc::clone(ch);
        }
        let ch = Arc::new(MockChannel {
            name: name.to_string(),
            state: StateCell::new(name),
            sent: Mutex::new(Vec::new()),
        });
        ch.open().await.unwrap();
        *slot = Some(Arc::clone(&ch));
        ch
    }
}

#[async_trait]
impl Channel for MockConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> &StateCell {
        &self.state
    }

    async fn open(&self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.fail_open {
            self.state.set(ChannelState::Error);
            return Err(Error::message("mock transport refused"));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.state.set(ChannelState::Open);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for (_, ch) in self.senders.drain().await {
            ch.close().await?;
        }
        for (_, ch) in self.receivers.drain().await {
            ch.close().await?;
        }
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        self.state.set(ChannelState::Closed);
        if self.fail_close {
            return Err(Error::message("mock close failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn initialize(&mut self, config: Arc<SwitchyardConfig>) -> Result<()> {
        let settings = config.config_for_connector(&self.name)?;
        self.fail_open = settings.bool_or("failOpen", false, &self.name)?;
        self.fail_close = settings.bool_or("failClose", false, &self.name)?;
        Ok(())
    }

    async fn sender(&self, name: &str) -> Result<Arc<dyn Sender>> {
        Ok(self.pooled(&self.senders, name).await)
    }

    async fn receiver(&self, name: &str) -> Result<Arc<dyn Receiver>> {
        Ok(self.pooled(&self.receivers, name).await)
    }
}

struct MockChannel {
    name: String,
    state: StateCell,
    sent: Mutex<Vec<Message>>,
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> &StateCell {
        &self.state
    }

    async fn open(&self) -> Result<()> {
        self.state.set(ChannelState::Open);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.set(ChannelState::Closed);
        Ok(())
    }
}

#[async_trait]
impl Sender for MockChannel {
    async fn send(&self, message: Message) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

#[async_trait]
impl Receiver for MockChannel {
    async fn subscribe(
        &self,
        _observer: Arc<dyn MessageObserver>,
        _routing: Option<&str>,
    ) -> Result<Subscription> {
        Ok(Subscription::new(1, self.name.clone(), || {}))
    }
}

fn yard() -> (Switchyard, Arc<Counters>) {
    let yard = Switchyard::new();
    let counters = Arc::new(Counters::default());
    let c = Arc::clone(&counters);
    yard.register_connector_plugin("mock", move |name, config| {
        MockConnector::build(name, config, Arc::clone(&c))
    });
    (yard, counters)
}

fn tree(dest: &str) -> Value {
    json!({
        "switchyard": {
            "connectors": {
                "main": {"type": "mock", "url": "mock://main"},
                "other": {"type": "mock", "url": "mock://other"},
                "broken": {"type": "mock", "failOpen": true}
            },
            "senders": {
                "out": {"connector": "main", "dest": dest},
                "side": {"connector": "other", "dest": "/q/side"}
            },
            "receivers": {
                "in": {"connector": "main", "dest": dest},
                "nowhere": {"dest": "/q/x"}
            }
        }
    })
}

#[tokio::test]
async fn one_connector_per_name_under_concurrency() {
    let (yard, counters) = yard();
    yard.configure(tree("/q/a"), &Vars::new(), false).await.unwrap();
    let yard = Arc::new(yard);

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let yard = Arc::clone(&yard);
            tokio::spawn(async move { yard.connector("main").await.unwrap() })
        })
        .collect();
    let mut connectors = Vec::new();
    for t in tasks {
        connectors.push(t.await.unwrap());
    }

    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
    assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
    assert!(connectors.iter().all(|c| Arc::ptr_eq(c, &connectors[0])));
    assert_eq!(connectors[0].state().get(), ChannelState::Open);
}

#[tokio::test]
async fn reload_false_keeps_instance_reload_true_replaces_it() {
    let (yard, _) = yard();
    let first = yard.configure(tree("/q/a"), &Vars::new(), false).await.unwrap();
    let kept = yard.configure(tree("/q/b"), &Vars::new(), false).await.unwrap();
    assert!(Arc::ptr_eq(&first, &kept));

    let reloaded = yard.configure(tree("/q/a"), &Vars::new(), true).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &reloaded));
    assert!(Arc::ptr_eq(&reloaded, &yard.config().unwrap()));
}

#[tokio::test]
async fn reload_replaces_only_changed_connectors() {
    let (yard, counters) = yard();
    yard.configure(tree("/q/a"), &Vars::new(), false).await.unwrap();

    let old_receiver = yard.receiver("in").await.unwrap();
    let side = yard.sender("side").await.unwrap();
    let old_main = yard.connector("main").await.unwrap();
    let other = yard.connector("other").await.unwrap();

    yard.configure(tree("/q/b"), &Vars::new(), true).await.unwrap();

    assert_eq!(old_main.state().get(), ChannelState::Closed);
    assert_eq!(old_receiver.state().get(), ChannelState::Closed);
    assert_eq!(other.state().get(), ChannelState::Open);
    assert_eq!(side.state().get(), ChannelState::Open);

    let new_receiver = yard.receiver("in").await.unwrap();
    assert_eq!(new_receiver.state().get(), ChannelState::Open);
    assert!(!Arc::ptr_eq(&old_receiver, &new_receiver));
    let new_main = yard.connector("main").await.unwrap();
    assert!(!Arc::ptr_eq(&old_main, &new_main));
    assert!(Arc::ptr_eq(&other, &yard.connector("other").await.unwrap()));
    assert_eq!(counters.created.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn identical_reload_keeps_connectors() {
    let (yard, counters) = yard();
    yard.configure(tree("/q/a"), &Vars::new(), false).await.unwrap();
    let main = yard.connector("main").await.unwrap();
    yard.configure(tree("/q/a"), &Vars::new(), true).await.unwrap();
    assert!(Arc::ptr_eq(&main, &yard.connector("main").await.unwrap()));
    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connector_in_error_is_closed_and_replaced() {
    let (yard, counters) = yard();
    yard.configure(tree("/q/a"), &Vars::new(), false).await.unwrap();
    let broken = yard.connector("main").await.unwrap();
    let old_sender = yard.sender("out").await.unwrap();
    broken.state().set(ChannelState::Error);

    let fresh = yard.connector("main").await.unwrap();
    assert!(!Arc::ptr_eq(&broken, &fresh));
    assert_eq!(fresh.state().get(), ChannelState::Open);
    assert_eq!(broken.state().get(), ChannelState::Closed);
    assert_eq!(old_sender.state().get(), ChannelState::Closed);
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);

    let sender = yard.sender("out").await.unwrap();
    assert!(!Arc::ptr_eq(&old_sender, &sender));
    assert_eq!(yard.live_connectors(), vec!["main"]);
}

#[tokio::test]
async fn closed_channel_is_replaced_by_its_connector() {
    let (yard, counters) = yard();
    yard.configure(tree("/q/a"), &Vars::new(), false).await.unwrap();
    let sender = yard.sender("out").await.unwrap();
    sender.close().await.unwrap();

    let again = yard.sender("out").await.unwrap();
    assert!(!Arc::ptr_eq(&sender, &again));
    assert_eq!(again.state().get(), ChannelState::Open);
    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sender_routes_through_its_connector() {
    let (yard, _) = yard();
    yard.configure(tree("/q/a"), &Vars::new(), false).await.unwrap();
    let sender = yard.sender("out").await.unwrap();
    sender.send(Message::new("hello world")).await.unwrap();
    assert_eq!(yard.live_connectors(), vec!["main"]);
    assert!(Arc::ptr_eq(&sender, &yard.sender("out").await.unwrap()));
}

#[tokio::test]
async fn resolution_errors() {
    let (yard, _) = yard();
    assert!(yard.sender("out").await.err().unwrap().is_config());

    yard.configure(tree("/q/a"), &Vars::new(), false).await.unwrap();
    let missing = yard.sender("ghost").await.err().unwrap();
    assert!(matches!(missing, Error::ConfigNotFound { ref path } if path == "senders.ghost"));

    let unbound = yard.receiver("nowhere").await.err().unwrap();
    assert!(unbound.to_string().contains("[connector]"));
}

#[tokio::test]
async fn failed_open_is_not_cached() {
    let (yard, counters) = yard();
    yard.configure(tree("/q/a"), &Vars::new(), false).await.unwrap();
    assert!(yard.connector("broken").await.is_err());
    assert!(yard.connector("broken").await.is_err());
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    assert!(yard.live_connectors().is_empty());
}

#[tokio::test]
async fn close_is_best_effort_and_resets() {
    let (yard, counters) = yard();
    let mut t = tree("/q/a");
    t["switchyard"]["connectors"]["other"]["failClose"] = json!(true);
    yard.configure(t, &Vars::new(), false).await.unwrap();
    let main = yard.connector("main").await.unwrap();
    let other = yard.connector("other").await.unwrap();

    yard.close().await;

    assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
    assert_eq!(main.state().get(), ChannelState::Closed);
    assert_eq!(other.state().get(), ChannelState::Closed);
    assert!(yard.config().is_err());

    yard.configure(tree("/q/a"), &Vars::new(), false).await.unwrap();
    let fresh = yard.connector("main").await.unwrap();
    assert!(!Arc::ptr_eq(&main, &fresh));
}

#[tokio::test]
async fn client_id_is_a_uuid_and_settable() {
    let (yard, _) = yard();
    assert_eq!(yard.client_id().len(), 36);
    yard.set_client_id("worker-1");
    assert_eq!(yard.client_id(), "worker-1");
}

#[tokio::test]
async fn placeholders_resolve_against_vars() {
    let (yard, _) = yard();
    let vars = Vars::from([("host".to_string(), "broker".to_string())]);
    let cfg = yard
        .configure(
            json!({"connectors": {"main": {"type": "mock", "url": "ws://${host}/${missing}"}}}),
            &vars,
            false,
        )
        .await
        .unwrap();
    assert_eq!(
        cfg.config_for_connector("main").unwrap()["url"],
        json!("ws://broker/${missing}")
    );
}
