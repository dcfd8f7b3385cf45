//! Channel lifecycle primitives shared by the orchestrator and every
//! transport connector.
//!
//! A connector (AMQP, WebSocket-STOMP, ...) implements [`Connector`] and
//! hands out pooled [`Sender`]s and [`Receiver`]s. Every one of them is a
//! [`Channel`] whose [`ChannelState`] is observable through a [`StateCell`].

pub mod channel;
pub mod message;
pub mod pool;
pub mod registry;
pub mod state;

pub use {
    channel::{
        Channel, Connector, FnObserver, MessageObserver, Receiver, Sender, Subscription,
        observer_fn,
    },
    message::{
        DefaultIdGenerator, IdGenerator, Message, MessageBuilder, id_generator,
        install_id_generator, next_id,
    },
    pool::{KeyedPool, SlotGuard},
    registry::{ConnectorFactory, ConnectorRegistry},
    state::{ChannelState, DEFAULT_STATE_TIMEOUT, StateCell, StateWatch, wait_for_state},
};
