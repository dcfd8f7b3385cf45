//! Handle shared by a connector and its channels to reach the live
//! connection.
//!
//! Every successful connect installs a fresh outbound queue and bumps the
//! link generation. Subscription handles from an older generation died
//! with their connection and are only forgotten locally.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    switchyard_common::{Error, Result},
    tokio::sync::mpsc,
    tracing::{debug, trace},
};

use crate::frame::{self, Frame};

/// Work item for a subscription's dispatcher.
#[derive(Debug)]
pub(crate) enum Delivery {
    Frame(Frame),
    Complete,
}

struct Route {
    generation: u64,
    deliver: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct Link {
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    generation: u64,
    routes: HashMap<String, Route>,
}

pub(crate) struct StompClient {
    name: String,
    link: Mutex<Link>,
    next_subscription: AtomicU64,
}

impl StompClient {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: Mutex::new(Link::default()),
            next_subscription: AtomicU64::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Route outbound frames to a freshly connected transport.
    pub(crate) fn attach(&self, outbound: mpsc::UnboundedSender<Frame>) -> u64 {
        let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        link.generation += 1;
        link.outbound = Some(outbound);
        link.generation
    }

    pub(crate) fn detach(&self) {
        self.link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .outbound = None;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .outbound
            .is_some()
    }

    fn transmit_locked(&self, link: &Link, frame: Frame) -> Result<()> {
        let outbound = link
            .outbound
            .as_ref()
            .ok_or_else(|| Error::channel(&self.name, "not connected to the broker"))?;
        trace!(connector = %self.name, frame = %frame, "queueing frame");
        outbound
            .send(frame)
            .map_err(|_| Error::channel(&self.name, "connection is shutting down"))
    }

    pub(crate) fn transmit(&self, frame: Frame) -> Result<()> {
        let link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        self.transmit_locked(&link, frame)
    }

    /// Subscribe `destination` on the live connection; frames arriving for
    /// it go to `deliver`. Returns the transport subscription id.
    pub(crate) fn subscribe(
        &self,
        destination: &str,
        deliver: mpsc::UnboundedSender<Delivery>,
    ) -> Result<String> {
        let id = format!(
            "sub-{}",
            self.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        let frame = Frame::new(frame::SUBSCRIBE)
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", "auto");
        self.transmit_locked(&link, frame)?;
        let generation = link.generation;
        link.routes.insert(id.clone(), Route {
            generation,
            deliver,
        });
        debug!(connector = %self.name, destination, subscription = %id, "subscribed");
        Ok(id)
    }

    /// Drop the transport subscription `id`. Only handles of the current
    /// connection are unsubscribed on the wire.
    pub(crate) fn unsubscribe(&self, id: &str) -> Result<()> {
        let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        let Some(route) = link.routes.remove(id) else {
            return Ok(());
        };
        if route.generation != link.generation {
            debug!(connector = %self.name, subscription = %id, "dropping stale subscription");
            return Ok(());
        }
        self.transmit_locked(&link, Frame::new(frame::UNSUBSCRIBE).header("id", id))
    }

    /// Hand a `MESSAGE` frame to the subscription it names.
    pub(crate) fn route(&self, frame: Frame) {
        let link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        let Some(route) = frame.get("subscription").and_then(|id| link.routes.get(id)) else {
            debug!(connector = %self.name, frame = %frame, "message for unknown subscription");
            return;
        };
        // A closed dispatcher means the subscription is being torn down.
        let _ = route.deliver.send(Delivery::Frame(frame));
    }

    pub(crate) fn route_count(&self) -> usize {
        self.link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .routes
            .len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn requires_a_connection() {
        let client = StompClient::new("ws");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(!client.is_connected());
        assert!(client.subscribe("/q", tx).is_err());
        assert!(client.transmit(Frame::new(frame::SEND)).is_err());
    }

    #[test]
    fn routes_messages_by_subscription_id() {
        let client = StompClient::new("ws");
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        client.attach(out_tx);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = client.subscribe("/queue/a", tx).unwrap();

        let sub = out_rx.try_recv().unwrap();
        assert!(sub.is(frame::SUBSCRIBE));
        assert_eq!(sub.get("destination"), Some("/queue/a"));

        client.route(Frame::new(frame::MESSAGE).header("subscription", id.as_str()).body("x"));
        client.route(Frame::new(frame::MESSAGE).header("subscription", "other"));
        assert!(matches!(rx.try_recv(), Ok(Delivery::Frame(f)) if f.body == b"x"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stale_handles_are_forgotten_without_wire_traffic() {
        let client = StompClient::new("ws");
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        client.attach(out_tx);
        let (tx, _rx) = mpsc::unbounded_channel();
        let old = client.subscribe("/q", tx).unwrap();
        let _ = out_rx.try_recv();

        client.detach();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        client.attach(out_tx);
        client.unsubscribe(&old).unwrap();
        assert!(out_rx.try_recv().is_err());
        assert_eq!(client.route_count(), 0);
    }

    #[test]
    fn live_handles_are_unsubscribed_on_the_wire() {
        let client = StompClient::new("ws");
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        client.attach(out_tx);
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = client.subscribe("/q", tx).unwrap();
        let _ = out_rx.try_recv();
        client.unsubscribe(&id).unwrap();
        let unsub = out_rx.try_recv().unwrap();
        assert!(unsub.is(frame::UNSUBSCRIBE));
        assert_eq!(unsub.get("id"), Some(id.as_str()));
    }
}
