use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    clap::{Args, ValueEnum},
    serde_json::Value,
    switchyard::{Message, MessageObserver, Switchyard},
    tokio::sync::mpsc,
    tracing::info,
};

use crate::parse_pair;

/// Exactly one payload form.
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct Payload {
    /// Plain-text payload.
    #[arg(long)]
    text: Option<String>,

    /// JSON payload; sent as `application/json`.
    #[arg(long)]
    json: Option<String>,

    /// Send the raw bytes of a file.
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Args)]
pub struct SendArgs {
    /// Sender name from the configuration.
    sender: String,

    #[command(flatten)]
    payload: Payload,

    /// Routing key appended to the sender's destination.
    #[arg(long)]
    routing: Option<String>,

    /// Message header as KEY=VALUE (repeatable).
    #[arg(long = "header", value_name = "KEY=VALUE")]
    headers: Vec<String>,

    /// Content type for `--file` payloads.
    #[arg(long)]
    content_type: Option<String>,
}

#[derive(Clone, Copy, Default, ValueEnum)]
pub enum Format {
    /// Payload text, then its JSON view when it parses.
    #[default]
    Pretty,
    /// One JSON document per message.
    Json,
}

#[derive(Args)]
pub struct ReceiveArgs {
    /// Receiver name from the configuration.
    receiver: String,

    /// Only messages with this routing key.
    #[arg(long)]
    routing: Option<String>,

    /// Stop after this many messages.
    #[arg(long)]
    count: Option<usize>,

    #[arg(long, value_enum, default_value_t = Format::Pretty)]
    format: Format,
}

fn build_message(args: &SendArgs) -> Result<Message> {
    let mut builder = Message::builder();
    let Payload { text, json, file } = &args.payload;
    builder = match (text, json, file) {
        (Some(text), ..) => builder.payload_as_string(text.as_str()),
        (_, Some(json), _) => {
            let value: Value = serde_json::from_str(json).context("--json is not valid JSON")?;
            builder.payload_as_json(value)
        },
        (.., Some(path)) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("cannot read payload file {}", path.display()))?;
            builder.payload(bytes)
        },
        _ => anyhow::bail!("one of --text, --json or --file is required"),
    };
    if let Some(ct) = &args.content_type {
        builder = builder.content_type(ct.as_str());
    }
    if let Some(routing) = &args.routing {
        builder = builder.routing(routing.as_str());
    }
    for raw in &args.headers {
        let (k, v) = parse_pair(raw)?;
        builder = builder.header(k, v);
    }
    Ok(builder.build()?)
}

pub async fn send(yard: &Switchyard, args: SendArgs) -> Result<()> {
    let message = build_message(&args)?;
    let id = message.id;
    let sender = yard.sender(&args.sender).await?;
    sender.send(message).await?;
    info!(sender = %args.sender, id, "message sent");
    println!("sent message {id} through [{}]", args.sender);
    Ok(())
}

/// Rendering of one received message.
fn render(message: &Message, format: Format) -> String {
    match format {
        Format::Json => serde_json::to_string(message)
            .unwrap_or_else(|e| format!("{{\"error\":\"cannot render message: {e}\"}}")),
        Format::Pretty => {
            let mut out = format!(
                "message {} [{}] routing={}",
                message.id, message.content_type, message.routing
            );
            match message.payload_as_str() {
                Ok(text) => {
                    out.push_str("\n  string: ");
                    out.push_str(text);
                    if let Ok(json) = message.payload_as_json::<Value>() {
                        out.push_str("\n  json:   ");
                        out.push_str(&json.to_string());
                    }
                },
                Err(_) => out.push_str(&format!("\n  binary: {} bytes", message.payload.len())),
            }
            out
        },
    }
}

enum Event {
    Message(Message),
    Complete,
}

struct Forward(mpsc::UnboundedSender<Event>);

impl MessageObserver for Forward {
    fn next(&self, message: Message) {
        let _ = self.0.send(Event::Message(message));
    }

    fn complete(&self) {
        let _ = self.0.send(Event::Complete);
    }
}

pub async fn receive(yard: &Switchyard, args: ReceiveArgs) -> Result<()> {
    let receiver = yard.receiver(&args.receiver).await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = receiver
        .subscribe(Arc::new(Forward(tx)), args.routing.as_deref())
        .await?;
    eprintln!(
        "listening on [{}] ({}), press Ctrl-C to stop",
        args.receiver,
        subscription.destination()
    );

    let mut seen = 0usize;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(Event::Message(message)) => {
                    println!("{}", render(&message, args.format));
                    seen += 1;
                    if args.count.is_some_and(|n| seen >= n) {
                        break;
                    }
                },
                Some(Event::Complete) | None => {
                    eprintln!("receiver [{}] closed", args.receiver);
                    return Ok(());
                },
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!();
                break;
            },
        }
    }
    subscription.unsubscribe();
    info!(receiver = %args.receiver, received = seen, "receive finished");
    Ok(())
}
