//! Switchyard: address senders and receivers by name and let the configured
//! transport connector do the rest.
//!
//! ```ignore
//! let yard = Switchyard::new();
//! switchyard_wsstomp::register(yard.registry());
//! yard.configure(tree, &vars, false).await?;
//! yard.sender("orders").await?.send(Message::new("hello world")).await?;
//! ```

pub mod logging;
pub mod orchestrator;

pub use {
    orchestrator::Switchyard,
    switchyard_channels::{
        Channel, ChannelState, Connector, ConnectorRegistry, Message, MessageBuilder,
        MessageObserver, Receiver, Sender, StateCell, Subscription, observer_fn, wait_for_state,
    },
    switchyard_common::{Error, ErrorCode, ErrorKind, Result},
    switchyard_config::{SwitchyardConfig, Vars},
};
