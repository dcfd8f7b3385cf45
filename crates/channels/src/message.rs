//! The transport-neutral message and its identifier generator.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, LazyLock, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::Value,
    switchyard_common::{Error, Result},
};

/// Produces message identifiers.
///
/// Identifiers are only unique within one process unless the installed
/// implementation says otherwise.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> u64;
}

/// Counts up from 1. Not persistent, not cluster-safe.
#[derive(Debug)]
pub struct DefaultIdGenerator {
    next: AtomicU64,
}

impl DefaultIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for DefaultIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for DefaultIdGenerator {
    fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

static ID_GENERATOR: LazyLock<RwLock<Arc<dyn IdGenerator>>> =
    LazyLock::new(|| RwLock::new(Arc::new(DefaultIdGenerator::new())));

/// Replace the process-wide generator used for messages built without an id.
pub fn install_id_generator(generator: Arc<dyn IdGenerator>) {
    *ID_GENERATOR.write().unwrap_or_else(|e| e.into_inner()) = generator;
}

/// The currently installed generator.
pub fn id_generator() -> Arc<dyn IdGenerator> {
    Arc::clone(&ID_GENERATOR.read().unwrap_or_else(|e| e.into_inner()))
}

pub fn next_id() -> u64 {
    id_generator().next_id()
}

/// A piece of information travelling from a sender to a receiver.
///
/// The string and JSON forms are views over `payload`; setting them
/// rewrites `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub content_type: String,
    pub headers: BTreeMap<String, String>,
    #[serde(with = "payload_bytes")]
    pub payload: Vec<u8>,
    pub routing: String,
    pub ttl: u32,
}

impl Message {
    pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";
    pub const JSON_CONTENT_TYPE: &str = "application/json";
    pub const DEFAULT_ROUTING: &str = "/";
    pub const DEFAULT_TTL: u32 = 16;

    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Message with a raw payload and default attributes.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    pub fn payload_as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| Error::message(format!("payload of message {} is not UTF-8: {e}", self.id)))
    }

    pub fn set_payload_as_string(&mut self, text: impl Into<String>) {
        self.payload = text.into().into_bytes();
    }

    pub fn payload_as_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| Error::message(format!("payload of message {} is not JSON: {e}", self.id)))
    }

    pub fn set_payload_as_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.payload = serde_json::to_vec(value)
            .map_err(|e| Error::message(format!("cannot encode JSON payload: {e}")))?;
        Ok(())
    }

    /// `routing` unless it is empty or the default `/`.
    pub fn effective_routing(&self) -> Option<&str> {
        match self.routing.as_str() {
            "" | Self::DEFAULT_ROUTING => None,
            r => Some(r),
        }
    }
}

impl Default for Message {
    /// Default attributes, with an id drawn from the installed generator.
    fn default() -> Self {
        Self {
            id: next_id(),
            content_type: Self::DEFAULT_CONTENT_TYPE.to_string(),
            headers: BTreeMap::new(),
            payload: Vec::new(),
            routing: Self::DEFAULT_ROUTING.to_string(),
            ttl: Self::DEFAULT_TTL,
        }
    }
}

#[derive(Debug, Clone)]
enum PayloadSource {
    Bytes(Vec<u8>),
    Text(String),
    Json(Value),
}

/// Builds a [`Message`]. At most one payload form may be given; with none
/// the payload is empty.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    id: Option<u64>,
    content_type: Option<String>,
    headers: BTreeMap<String, String>,
    payload: Option<PayloadSource>,
    payload_forms: usize,
    routing: Option<String>,
    ttl: Option<u32>,
}

impl MessageBuilder {
    pub fn id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn payload(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.with_payload(PayloadSource::Bytes(bytes.into()))
    }

    pub fn payload_as_string(self, text: impl Into<String>) -> Self {
        self.with_payload(PayloadSource::Text(text.into()))
    }

    pub fn payload_as_json(self, value: Value) -> Self {
        self.with_payload(PayloadSource::Json(value))
    }

    fn with_payload(mut self, source: PayloadSource) -> Self {
        self.payload = Some(source);
        self.payload_forms += 1;
        self
    }

    /// Fails when more than one payload form was supplied.
    pub fn build(self) -> Result<Message> {
        if self.payload_forms > 1 {
            return Err(Error::message(
                "a message payload must be given in exactly one form (bytes, string or JSON)",
            ));
        }
        let mut content_type = self.content_type;
        let payload = match self.payload {
            None => Vec::new(),
            Some(PayloadSource::Bytes(b)) => b,
            Some(PayloadSource::Text(s)) => s.into_bytes(),
            Some(PayloadSource::Json(v)) => {
                content_type.get_or_insert_with(|| Message::JSON_CONTENT_TYPE.to_string());
                serde_json::to_vec(&v)
                    .map_err(|e| Error::message(format!("cannot encode JSON payload: {e}")))?
            },
        };
        Ok(Message {
            id: self.id.unwrap_or_else(next_id),
            content_type: content_type.unwrap_or_else(|| Message::DEFAULT_CONTENT_TYPE.to_string()),
            headers: self.headers,
            payload,
            routing: self
                .routing
                .unwrap_or_else(|| Message::DEFAULT_ROUTING.to_string()),
            ttl: self.ttl.unwrap_or(Message::DEFAULT_TTL),
        })
    }
}

/// Payload travels as a UTF-8 string when it is one, as a byte array otherwise.
mod payload_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(bytes) {
            Ok(text) => s.serialize_str(text),
            Err(_) => s.serialize_bytes(bytes),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Bytes(Vec<u8>),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Ok(match Repr::deserialize(d)? {
            Repr::Text(s) => s.into_bytes(),
            Repr::Bytes(b) => b,
        })
    }
}
