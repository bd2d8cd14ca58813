//! The request engine: send a command, collect its reply lines until
//! the trailing result code, and queue any unsolicited broadcasts that
//! interleave with it.
//!
//! BUSY is a first-class recoverable outcome of the protocol, so
//! `send` retries it a bounded number of times before giving up. A
//! server silent past the watchdog interval is treated as gone.

use crate::error::{ClientError, Result};
use ccd_core::protocol::{split_command, ResultCode};
use ccd_core::state::CaptureState;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Watchdog: maximum server silence while a reply is expected.
    pub response_timeout: Duration,
    /// How many times a BUSY reply is retried before giving up.
    pub busy_retries: u32,
    /// Pause between BUSY retries.
    pub busy_backoff: Duration,
    /// How long to idle between probe commands while waiting for a
    /// frame.
    pub probe_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(10),
            busy_retries: 5,
            busy_backoff: Duration::from_millis(200),
            probe_interval: Duration::from_millis(500),
        }
    }
}

/// One command's reply: its lines and the trailing result code.
#[derive(Debug, Clone)]
pub struct Response {
    pub lines: Vec<String>,
    pub code: ResultCode,
}

impl Response {
    /// Value of a `key=value` reply line, if present.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let (k, v) = split_command(line);
            (k == key).then_some(v.unwrap_or(""))
        })
    }
}

/// An unsolicited server broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    State(CaptureState),
    LastFilename(String),
}

fn parse_event(line: &str) -> Option<Event> {
    let (key, value) = split_command(line);
    match (key, value) {
        ("expstate", Some(digit)) => {
            let state = digit.parse::<u8>().ok().and_then(CaptureState::from_wire)?;
            Some(Event::State(state))
        }
        ("lastfilename", Some(name)) => Some(Event::LastFilename(name.to_string())),
        _ => None,
    }
}

trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// A connected protocol client.
pub struct Client {
    config: ClientConfig,
    reader: BufReader<tokio::io::ReadHalf<Box<dyn Stream>>>,
    writer: tokio::io::WriteHalf<Box<dyn Stream>>,
    events: VecDeque<Event>,
}

impl Client {
    /// Connect over TCP (`host:port`) or a UNIX socket (`unix:<path>`).
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with(addr, ClientConfig::default()).await
    }

    pub async fn connect_with(addr: &str, config: ClientConfig) -> Result<Self> {
        let stream: Box<dyn Stream> = match addr.strip_prefix("unix:") {
            Some(path) => Box::new(UnixStream::connect(path).await?),
            None => Box::new(TcpStream::connect(addr).await?),
        };
        let (read_half, writer) = tokio::io::split(stream);
        tracing::debug!(addr, "connected");
        Ok(Self {
            config,
            reader: BufReader::new(read_half),
            writer,
            events: VecDeque::new(),
        })
    }

    /// Send one command line and collect its reply, retrying BUSY a
    /// bounded number of times.
    pub async fn send(&mut self, line: &str) -> Result<Response> {
        let (key, _) = split_command(line);
        let mut attempt = 0;
        loop {
            let response = self.send_once(line, key).await?;
            if response.code != ResultCode::Busy {
                return Ok(response);
            }
            if attempt >= self.config.busy_retries {
                return Err(ClientError::StillBusy(line.to_string()));
            }
            attempt += 1;
            tracing::debug!(command = line, attempt, "busy, retrying");
            tokio::time::sleep(self.config.busy_backoff).await;
        }
    }

    /// Send a command and require an OK result, returning the echoed
    /// value for `key` when the server sent one.
    pub async fn send_ok(&mut self, line: &str) -> Result<Option<String>> {
        let (key, _) = split_command(line);
        let response = self.send(line).await?;
        if response.code != ResultCode::Ok {
            return Err(ClientError::Refused {
                command: line.to_string(),
                code: response.code,
            });
        }
        Ok(response.value_of(key).map(str::to_string))
    }

    /// Getter convenience: `key` must echo `key=<value>`.
    pub async fn get(&mut self, key: &str) -> Result<String> {
        let value = self.send_ok(key).await?;
        value.ok_or_else(|| ClientError::Refused {
            command: key.to_string(),
            code: ResultCode::Fail,
        })
    }

    async fn send_once(&mut self, line: &str, key: &str) -> Result<Response> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        let mut lines = Vec::new();
        loop {
            let raw = self.read_line(self.config.response_timeout).await?;
            if let Some(code) = ResultCode::from_wire(raw.trim()) {
                return Ok(Response { lines, code });
            }
            let (reply_key, _) = split_command(&raw);
            if reply_key != key {
                // Broadcasts may interleave with a reply in flight.
                if let Some(event) = parse_event(&raw) {
                    self.events.push_back(event);
                    continue;
                }
            }
            lines.push(raw);
        }
    }

    async fn read_line(&mut self, wait: Duration) -> Result<String> {
        let mut buf = String::new();
        let read = tokio::time::timeout(wait, self.reader.read_line(&mut buf))
            .await
            .map_err(|_| ClientError::Watchdog)??;
        if read == 0 {
            return Err(ClientError::Disconnected);
        }
        Ok(buf.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Pop an already-received broadcast without touching the socket.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Wait up to `wait` for the next broadcast.
    pub async fn wait_event(&mut self, wait: Duration) -> Result<Event> {
        if let Some(event) = self.events.pop_front() {
            return Ok(event);
        }
        loop {
            let raw = match self.read_line(wait).await {
                Ok(raw) => raw,
                Err(err) => return Err(err),
            };
            if let Some(event) = parse_event(&raw) {
                return Ok(event);
            }
            tracing::debug!(line = %raw, "ignoring stray line");
        }
    }

    /// Run one full exposure: set the exposure time, start, then
    /// interleave remaining-time probes with broadcast listening until
    /// the frame completes. Returns the written file path when the
    /// server announced one.
    pub async fn expose(&mut self, seconds: f64) -> Result<Option<String>> {
        self.send_ok(&format!("exptime={seconds}")).await?;
        self.send_ok("expstate=1").await?;
        let mut last_filename = None;
        let mut done = false;
        loop {
            match self.wait_event(self.config.probe_interval).await {
                Ok(Event::State(CaptureState::FrameReady)) => done = true,
                Ok(Event::State(CaptureState::Error)) => return Err(ClientError::CaptureFailed),
                Ok(Event::LastFilename(name)) => {
                    last_filename = Some(name);
                    if done {
                        return Ok(last_filename);
                    }
                }
                Ok(_) => {}
                Err(ClientError::Watchdog) => {
                    if done {
                        // The filename broadcast, if any, would have
                        // arrived by now.
                        return Ok(last_filename);
                    }
                    // Probe; doubles as the liveness check, since a
                    // dead server fails the reply watchdog.
                    let remaining = self.get("tremain").await?;
                    tracing::debug!(remaining, "exposure in progress");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Request cancellation of any in-flight exposure.
    pub async fn cancel(&mut self) -> Result<()> {
        self.send_ok("expstate=0").await?;
        Ok(())
    }
}
