//! Connection task: connect, STOMP handshake, pump frames, reconnect.

use std::{sync::Arc, time::Duration};

use {
    futures::{
        SinkExt, StreamExt,
        future::join_all,
        stream::{SplitSink, SplitStream},
    },
    switchyard_channels::{ChannelState, Receiver},
    switchyard_common::{Error, Result},
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot, watch},
        time::Instant,
    },
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
    },
    tracing::{debug, error, info, trace, warn},
};

use crate::{
    connector::Shared,
    frame::{self, Frame},
    settings::WsStompSettings,
};

/// Why a single connection attempt ended.
enum Outcome {
    /// `close()` asked us to stop.
    Shutdown,
    /// Transport went away after a successful handshake. Reported as
    /// `CLOSED` and retried, never as `ERROR`.
    Dropped(String),
    /// Could not connect or complete the handshake.
    Refused(Error),
    /// Broker sent an `ERROR` frame.
    Fatal(Error),
}

/// Spawned by `open()`. Reports the first open (or failure) through `opened`,
/// then keeps the connection alive until shut down or a fatal error.
pub(crate) async fn connection_loop(
    shared: Arc<Shared>,
    settings: WsStompSettings,
    opened: oneshot::Sender<Result<()>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut opened = Some(opened);
    loop {
        info!(connector = %shared.name, url = %settings.url, "connecting to STOMP broker");
        let outcome = connect_and_run(&shared, &settings, &mut opened, &mut shutdown).await;
        shared.client.detach();

        match outcome {
            Outcome::Shutdown => {
                debug!(connector = %shared.name, "connection task stopped");
                return;
            },
            Outcome::Fatal(e) => {
                error!(connector = %shared.name, error = %e, "STOMP broker reported an error");
                shared.fail(e, &mut opened);
                return;
            },
            Outcome::Refused(e) if opened.is_some() => {
                error!(connector = %shared.name, error = %e, "failed to open WS-STOMP connector");
                shared.fail(e, &mut opened);
                return;
            },
            Outcome::Refused(e) => {
                warn!(connector = %shared.name, error = %e, "reconnect attempt failed");
                shared.record_error(&e);
            },
            Outcome::Dropped(reason) => {
                info!(connector = %shared.name, reason = %reason, "disconnected from STOMP broker");
                shared.state.set(ChannelState::Closed);
            },
        }

        info!(
            connector = %shared.name,
            delay_ms = settings.reconnect_delay.as_millis() as u64,
            "reconnecting after delay"
        );
        tokio::select! {
            _ = tokio::time::sleep(settings.reconnect_delay) => {},
            _ = shutdown.changed() => return,
        }
    }
}

fn connect_frame(settings: &WsStompSettings) -> Frame {
    let mut f = Frame::new(frame::CONNECT)
        .header("accept-version", "1.2")
        .header(
            "heart-beat",
            format!(
                "{},{}",
                settings.heartbeat_outgoing.as_millis(),
                settings.heartbeat_incoming.as_millis()
            ),
        );
    let host = settings
        .vhost
        .clone()
        .or_else(|| settings.url.host_str().map(str::to_string));
    if let Some(host) = host {
        f = f.header("host", host);
    }
    if !settings.username.is_empty() {
        f = f
            .header("login", settings.username.as_str())
            .header("passcode", settings.password.as_str());
    }
    f
}

fn to_ws(frame: &Frame) -> WsMessage {
    let bytes = frame.encode();
    match String::from_utf8(bytes) {
        Ok(text) => WsMessage::Text(text.into()),
        Err(e) => WsMessage::Binary(e.into_bytes().into()),
    }
}

fn error_frame_to_error(name: &str, f: &Frame) -> Error {
    let detail = String::from_utf8_lossy(&f.body);
    let message = f.get("message").unwrap_or("broker error");
    Error::channel(name, format!("{message} {}", detail.trim()).trim().to_string())
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Open the WebSocket, send `CONNECT` and wait for `CONNECTED`.
async fn handshake(
    shared: &Shared,
    settings: &WsStompSettings,
) -> std::result::Result<(WsSink, WsSource, Frame), Outcome> {
    let (ws, _response) = connect_async(settings.url.as_str()).await.map_err(|e| {
        Outcome::Refused(Error::io(format!("cannot connect to {}", settings.url), e))
    })?;
    let (mut sink, mut stream) = ws.split();
    sink.send(to_ws(&connect_frame(settings)))
        .await
        .map_err(|e| Outcome::Refused(Error::io("failed to send CONNECT", e)))?;

    while let Some(msg) = stream.next().await {
        let data = match msg {
            Ok(WsMessage::Text(t)) => t.as_bytes().to_vec(),
            Ok(WsMessage::Binary(b)) => b.to_vec(),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(Outcome::Refused(Error::io("handshake failed", e))),
        };
        for f in frame::decode_all(&data).map_err(Outcome::Refused)? {
            if f.is(frame::CONNECTED) {
                return Ok((sink, stream, f));
            }
            if f.is(frame::ERROR) {
                return Err(Outcome::Fatal(error_frame_to_error(&shared.name, &f)));
            }
            debug!(connector = %shared.name, frame = %f, "ignoring frame before CONNECTED");
        }
    }
    Err(Outcome::Refused(Error::channel(
        &shared.name,
        "connection closed during STOMP handshake",
    )))
}

async fn connect_and_run(
    shared: &Shared,
    settings: &WsStompSettings,
    opened: &mut Option<oneshot::Sender<Result<()>>>,
    shutdown: &mut watch::Receiver<bool>,
) -> Outcome {
    let (mut sink, mut stream, connected) = tokio::select! {
        res = tokio::time::timeout(settings.connect_timeout, handshake(shared, settings)) => match res {
            Ok(Ok(parts)) => parts,
            Ok(Err(outcome)) => return outcome,
            Err(_) => return Outcome::Refused(Error::Timeout {
                name: shared.name.clone(),
                state: "CONNECTED".into(),
                after: settings.connect_timeout,
            }),
        },
        _ = shutdown.changed() => return Outcome::Shutdown,
    };

    let (send_every, expect_every) = frame::negotiate_heartbeat(
        settings.heartbeat_outgoing,
        settings.heartbeat_incoming,
        connected.get("heart-beat"),
    );
    info!(
        connector = %shared.name,
        server = connected.get("server").unwrap_or("unknown"),
        session = connected.get("session").unwrap_or(""),
        "connected to STOMP broker"
    );

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    shared.client.attach(out_tx);

    // Re-attach every receiver before reporting OPEN.
    let receivers = shared.receivers.snapshot().await;
    join_all(receivers.iter().map(|r| r.recover_after_reconnect())).await;
    shared.state.set(ChannelState::Open);
    if let Some(tx) = opened.take() {
        let _ = tx.send(Ok(()));
    }

    let idle = Duration::from_secs(3600);
    let mut beat = tokio::time::interval(if send_every.is_zero() { idle } else { send_every });
    let mut watchdog = tokio::time::interval(if expect_every.is_zero() { idle } else { expect_every });
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            msg = stream.next() => {
                last_seen = Instant::now();
                let data = match msg {
                    Some(Ok(WsMessage::Text(t))) => t.as_bytes().to_vec(),
                    Some(Ok(WsMessage::Binary(b))) => b.to_vec(),
                    Some(Ok(WsMessage::Ping(p))) => {
                        if let Err(e) = sink.send(WsMessage::Pong(p)).await {
                            return Outcome::Dropped(e.to_string());
                        }
                        continue;
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return Outcome::Dropped("closed by broker".into());
                    },
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Outcome::Dropped(e.to_string()),
                };
                if let Some(outcome) = handle_incoming(shared, &data) {
                    return outcome;
                }
            },
            out = out_rx.recv() => {
                let Some(f) = out else {
                    return Outcome::Dropped("outbound queue closed".into());
                };
                trace!(connector = %shared.name, frame = %f, "sending frame");
                if let Err(e) = sink.send(to_ws(&f)).await {
                    return Outcome::Dropped(e.to_string());
                }
            },
            _ = beat.tick(), if !send_every.is_zero() => {
                if let Err(e) = sink.send(WsMessage::Text("\n".into())).await {
                    return Outcome::Dropped(e.to_string());
                }
            },
            _ = watchdog.tick(), if !expect_every.is_zero() => {
                if last_seen.elapsed() > expect_every * 2 {
                    return Outcome::Dropped("heart-beat timeout".into());
                }
            },
            _ = shutdown.changed() => {
                let _ = sink.send(to_ws(&Frame::new(frame::DISCONNECT))).await;
                let _ = sink.send(WsMessage::Close(None)).await;
                return Outcome::Shutdown;
            },
        }
    }
}

fn handle_incoming(shared: &Shared, data: &[u8]) -> Option<Outcome> {
    let frames = match frame::decode_all(data) {
        Ok(frames) => frames,
        Err(e) => {
            warn!(connector = %shared.name, error = %e, "dropping undecodable frame");
            return None;
        },
    };
    for f in frames {
        match f.command.as_str() {
            frame::MESSAGE => {
                trace!(connector = %shared.name, frame = %f, "message received");
                shared.client.route(f);
            },
            frame::ERROR => return Some(Outcome::Fatal(error_frame_to_error(&shared.name, &f))),
            frame::RECEIPT => {
                debug!(connector = %shared.name, receipt = f.get("receipt-id").unwrap_or(""), "receipt");
            },
            other => debug!(connector = %shared.name, command = other, "ignoring frame"),
        }
    }
    None
}
