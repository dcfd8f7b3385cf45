//! STOMP 1.2 frame codec.
//!
//! One WebSocket message carries zero or more frames; a lone end-of-line
//! is a heart-beat. Header values are escaped in every frame except
//! `CONNECT` and `CONNECTED`.

use std::{fmt, time::Duration};

use switchyard_common::{Error, Result};

pub const CONNECT: &str = "CONNECT";
pub const CONNECTED: &str = "CONNECTED";
pub const SEND: &str = "SEND";
pub const SUBSCRIBE: &str = "SUBSCRIBE";
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
pub const DISCONNECT: &str = "DISCONNECT";
pub const MESSAGE: &str = "MESSAGE";
pub const RECEIPT: &str = "RECEIPT";
pub const ERROR: &str = "ERROR";

/// Encoded heart-beat.
pub const HEARTBEAT: &[u8] = b"\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    /// In wire order. Repeated names are kept; the first one wins on lookup.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is(&self, command: &str) -> bool {
        self.command == command
    }

    fn escapes_headers(&self) -> bool {
        !(self.is(CONNECT) || self.is(CONNECTED))
    }

    /// Wire form: command, headers, `content-length`, blank line, body, NUL.
    pub fn encode(&self) -> Vec<u8> {
        let escape = self.escapes_headers();
        let mut out = Vec::with_capacity(self.body.len() + 64);
        out.extend_from_slice(self.command.as_bytes());
        out.push(b'\n');
        for (k, v) in &self.headers {
            if k == "content-length" {
                continue;
            }
            push_header_part(&mut out, k, escape);
            out.push(b':');
            push_header_part(&mut out, v, escape);
            out.push(b'\n');
        }
        if !self.body.is_empty() {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        if let Some(dest) = self.get("destination") {
            write!(f, " {dest}")?;
        }
        write!(f, " ({} bytes)", self.body.len())
    }
}

fn push_header_part(out: &mut Vec<u8>, s: &str, escape: bool) {
    if !escape {
        out.extend_from_slice(s.as_bytes());
        return;
    }
    for c in s.chars() {
        match c {
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            ':' => out.extend_from_slice(b"\\c"),
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            },
        }
    }
}

fn unescape(raw: &str, escape: bool) -> Result<String> {
    if !escape || !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(Error::message(format!(
                    "invalid STOMP header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            },
        }
    }
    Ok(out)
}

/// Decode every frame in one WebSocket message. Heart-beats yield nothing.
pub fn decode_all(data: &[u8]) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    loop {
        while pos < data.len() && matches!(data[pos], b'\n' | b'\r') {
            pos += 1;
        }
        if pos >= data.len() {
            return Ok(frames);
        }
        let (frame, used) = decode_one(&data[pos..])?;
        frames.push(frame);
        pos += used;
    }
}

fn take_line<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a str> {
    let rest = &data[*pos..];
    let end = rest
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| Error::message("truncated STOMP frame"))?;
    *pos += end + 1;
    let line = rest[..end].strip_suffix(b"\r").unwrap_or(&rest[..end]);
    std::str::from_utf8(line).map_err(|_| Error::message("STOMP frame header is not UTF-8"))
}

fn decode_one(data: &[u8]) -> Result<(Frame, usize)> {
    let mut pos = 0;
    let command = take_line(data, &mut pos)?.to_string();
    let mut frame = Frame::new(command);
    let escape = frame.escapes_headers();

    loop {
        let line = take_line(data, &mut pos)?;
        if line.is_empty() {
            break;
        }
        let (k, v) = line
            .split_once(':')
            .ok_or_else(|| Error::message(format!("malformed STOMP header line [{line}]")))?;
        frame.headers.push((unescape(k, escape)?, unescape(v, escape)?));
    }

    let rest = &data[pos..];
    let body_len = match frame.get("content-length") {
        Some(len) => {
            let len: usize = len
                .trim()
                .parse()
                .map_err(|_| Error::message(format!("invalid content-length [{len}]")))?;
            if rest.len() <= len || rest[len] != 0 {
                return Err(Error::message("STOMP body shorter than its content-length"));
            }
            len
        },
        None => rest
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::message("STOMP frame is missing its NUL terminator"))?,
    };
    frame.body = rest[..body_len].to_vec();
    Ok((frame, pos + body_len + 1))
}

/// Heart-beat periods agreed from our `(outgoing, incoming)` wish and the
/// broker's `heart-beat` header. Zero disables the direction.
pub fn negotiate_heartbeat(
    outgoing: Duration,
    incoming: Duration,
    server: Option<&str>,
) -> (Duration, Duration) {
    let (sx, sy) = server
        .and_then(|h| h.split_once(','))
        .map(|(x, y)| {
            (
                x.trim().parse::<u64>().unwrap_or(0),
                y.trim().parse::<u64>().unwrap_or(0),
            )
        })
        .unwrap_or((0, 0));
    let agree = |ours: Duration, theirs: u64| {
        if ours.is_zero() || theirs == 0 {
            Duration::ZERO
        } else {
            ours.max(Duration::from_millis(theirs))
        }
    };
    (agree(outgoing, sy), agree(incoming, sx))
}
