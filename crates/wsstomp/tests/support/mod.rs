//! In-process STOMP-over-WebSocket broker for integration tests.
//!
//! Fans `SEND` frames out to subscriptions on the exact same destination
//! and can drop every client connection on demand.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    switchyard_wsstomp::frame::{self, Frame},
    tokio::{
        net::{TcpListener, TcpStream},
        sync::{mpsc, oneshot},
    },
    tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage},
};

struct Sub {
    conn: u64,
    id: String,
    destination: String,
    out: mpsc::UnboundedSender<Frame>,
}

#[derive(Default)]
struct State {
    subs: Mutex<Vec<Sub>>,
    kicks: Mutex<HashMap<u64, oneshot::Sender<()>>>,
    next_conn: AtomicU64,
    next_message: AtomicU64,
    connects: AtomicUsize,
    sent: Mutex<Vec<Frame>>,
    reject: bool,
}

pub struct MockBroker {
    url: String,
    state: Arc<State>,
}

impl MockBroker {
    pub async fn start() -> Self {
        Self::spawn(false).await
    }

    /// Broker answering every `CONNECT` with an `ERROR` frame.
    pub async fn start_rejecting() -> Self {
        Self::spawn(true).await
    }

    async fn spawn(reject: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State {
            reject,
            ..State::default()
        });
        let s = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(Arc::clone(&s), stream));
            }
        });
        Self {
            url: format!("ws://{addr}/ws"),
            state,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Completed STOMP handshakes so far.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self, destination: &str) -> usize {
        self.state
            .subs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.destination == destination)
            .count()
    }

    /// `SEND` frames received so far.
    pub fn sent(&self) -> Vec<Frame> {
        self.state.sent.lock().unwrap().clone()
    }

    /// Kill every client connection without a STOMP goodbye.
    pub fn drop_connections(&self) {
        let kicks: Vec<_> = self.state.kicks.lock().unwrap().drain().collect();
        for (_, kick) in kicks {
            let _ = kick.send(());
        }
        self.state.subs.lock().unwrap().clear();
    }

    /// Deliver a broker-originated message to `destination`.
    pub fn publish(&self, destination: &str, headers: &[(&str, &str)], body: &str) {
        let mut f = Frame::new(frame::SEND).header("destination", destination);
        for (k, v) in headers {
            f = f.header(*k, *v);
        }
        fan_out(&self.state, f.body(body));
    }

    pub async fn wait_for_subscriptions(&self, destination: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.subscriptions(destination) != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} subscriptions on {destination}"));
    }
}

fn fan_out(state: &State, send: Frame) {
    let Some(destination) = send.get("destination").map(str::to_string) else {
        return;
    };
    let subs = state.subs.lock().unwrap();
    for sub in subs.iter().filter(|s| s.destination == destination) {
        let n = state.next_message.fetch_add(1, Ordering::SeqCst);
        let mut msg = Frame::new(frame::MESSAGE)
            .header("subscription", sub.id.as_str())
            .header("message-id", format!("T_{}@@session@@{n}", sub.id))
            .header("destination", destination.as_str());
        for (k, v) in &send.headers {
            if k != "destination" && k != "content-length" {
                msg = msg.header(k.as_str(), v.as_str());
            }
        }
        let _ = sub.out.send(msg.body(send.body.clone()));
    }
}

async fn serve(state: Arc<State>, stream: TcpStream) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let conn = state.next_conn.fetch_add(1, Ordering::SeqCst);
    let (kick_tx, mut kick_rx) = oneshot::channel();
    state.kicks.lock().unwrap().insert(conn, kick_tx);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            _ = &mut kick_rx => break,
            out = out_rx.recv() => {
                let Some(f) = out else { break };
                let text = String::from_utf8(f.encode()).unwrap();
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            },
            msg = source.next() => {
                let data = match msg {
                    Some(Ok(WsMessage::Text(t))) => t.as_bytes().to_vec(),
                    Some(Ok(WsMessage::Binary(b))) => b.to_vec(),
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let mut done = false;
                for f in frame::decode_all(&data).unwrap() {
                    done |= handle(&state, conn, &out_tx, f);
                }
                if done {
                    // Let queued replies go out before hanging up.
                    while let Ok(f) = out_rx.try_recv() {
                        let text = String::from_utf8(f.encode()).unwrap();
                        let _ = sink.send(WsMessage::Text(text.into())).await;
                    }
                    break;
                }
            },
        }
    }
    state.subs.lock().unwrap().retain(|s| s.conn != conn);
    state.kicks.lock().unwrap().remove(&conn);
}

/// Returns true when the connection should end.
fn handle(state: &State, conn: u64, out: &mpsc::UnboundedSender<Frame>, f: Frame) -> bool {
    match f.command.as_str() {
        frame::CONNECT => {
            if state.reject {
                let _ = out.send(
                    Frame::new(frame::ERROR)
                        .header("message", "access refused")
                        .body("bad credentials"),
                );
                return true;
            }
            state.connects.fetch_add(1, Ordering::SeqCst);
            let _ = out.send(
                Frame::new(frame::CONNECTED)
                    .header("version", "1.2")
                    .header("heart-beat", "0,0")
                    .header("server", "mock/1.0")
                    .header("session", format!("session-{conn}")),
            );
        },
        frame::SUBSCRIBE => {
            state.subs.lock().unwrap().push(Sub {
                conn,
                id: f.get("id").unwrap_or_default().to_string(),
                destination: f.get("destination").unwrap_or_default().to_string(),
                out: out.clone(),
            });
        },
        frame::UNSUBSCRIBE => {
            let id = f.get("id").unwrap_or_default();
            state
                .subs
                .lock()
                .unwrap()
                .retain(|s| !(s.conn == conn && s.id == id));
        },
        frame::SEND => {
            state.sent.lock().unwrap().push(f.clone());
            fan_out(state, f);
        },
        frame::DISCONNECT => return true,
        _ => {},
    }
    false
}
