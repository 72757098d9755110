//! WebSocket transport
//!
//! Each transport runs as its own tokio task and talks to the link actor
//! only through channels: lifecycle events go up tagged with the transport's
//! generation, outbound text and close requests come down.

use crate::config::LinkConfig;
use crate::machine::{Generation, CLOSE_NORMAL};
use crate::manager::Signal;
use futures_util::{SinkExt, StreamExt};
use std::future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

/// What a transport reports about itself
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed(Option<u16>),
    Failed(String),
}

/// What the link asks of a transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCommand {
    Send(String),
    Close(u16),
}

/// Upward channel handed to a transport when it is opened.
///
/// A transport must report at most one `opened` and finish with exactly one
/// `closed` or `failed`.
#[derive(Clone, Debug)]
pub struct TransportEvents {
    generation: Generation,
    tx: UnboundedSender<Signal>,
}

impl TransportEvents {
    pub(crate) fn new(generation: Generation, tx: UnboundedSender<Signal>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn frame(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Frame(text.into()));
    }

    pub fn closed(&self, code: Option<u16>) {
        self.emit(TransportEvent::Closed(code));
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Failed(reason.into()));
    }

    fn emit(&self, event: TransportEvent) {
        // The link may already be torn down; nobody is left to tell.
        let _ = self.tx.send(Signal::Transport {
            generation: self.generation,
            event,
        });
    }
}

/// Downward channel to one live transport
#[derive(Debug)]
pub struct TransportHandle {
    tx: UnboundedSender<TransportCommand>,
}

impl TransportHandle {
    /// Handle plus the receiving end the transport task reads from
    pub fn channel() -> (Self, UnboundedReceiver<TransportCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(TransportCommand::Send(text)).is_ok()
    }

    pub fn close(&self, code: u16) -> bool {
        self.tx.send(TransportCommand::Close(code)).is_ok()
    }
}

/// Opens transports for the link. Swappable so the actor can be driven
/// without a network.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: &str, events: TransportEvents) -> TransportHandle;
}

/// Timings a WebSocket transport runs with
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportSettings {
    /// Ping interval, `None` disables keepalive
    pub keepalive: Option<Duration>,
    /// A ping with no inbound traffic after it for this long fails the transport
    pub pong_timeout: Duration,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
}

impl From<&LinkConfig> for TransportSettings {
    fn from(config: &LinkConfig) -> Self {
        Self {
            keepalive: config.keepalive(),
            pong_timeout: config.pong_timeout(),
            connect_timeout: config.connect_timeout(),
            close_timeout: config.close_timeout(),
        }
    }
}

/// tokio-tungstenite backed connector
#[derive(Clone, Debug)]
pub struct WsConnector {
    settings: TransportSettings,
}

impl WsConnector {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &str, events: TransportEvents) -> TransportHandle {
        let (handle, commands) = TransportHandle::channel();
        tokio::spawn(run_websocket(
            url.to_string(),
            events,
            commands,
            self.settings.clone(),
        ));
        handle
    }
}

async fn run_websocket(
    url: String,
    events: TransportEvents,
    mut commands: UnboundedReceiver<TransportCommand>,
    settings: TransportSettings,
) {
    let generation = events.generation();
    info!(url = %url, generation, "Connecting to WebSocket");

    // A close may be requested before the handshake finishes
    let ws_stream = tokio::select! {
        res = time::timeout(settings.connect_timeout, connect_async(url.as_str())) => match res {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, generation, "Failed to connect");
                events.failed(e.to_string());
                return;
            }
            Err(_) => {
                let timeout_ms = settings.connect_timeout.as_millis() as u64;
                warn!(generation, timeout_ms, "WebSocket handshake timed out");
                events.failed(format!("connect timed out after {timeout_ms}ms"));
                return;
            }
        },
        code = close_requested(&mut commands) => {
            debug!(generation, code, "Close requested before transport opened");
            events.closed(Some(code));
            return;
        }
    };

    info!(generation, "WebSocket connected");
    events.opened();
    drive(ws_stream, &events, commands, &settings).await;
}

/// Pump an open socket until it ends, reporting exactly one close or failure
async fn drive<S>(
    ws_stream: WebSocketStream<S>,
    events: &TransportEvents,
    mut commands: UnboundedReceiver<TransportCommand>,
    settings: &TransportSettings,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let generation = events.generation();
    let close_timeout = settings.close_timeout;
    let (mut write, mut read) = ws_stream.split();
    let mut ping = settings
        .keepalive
        .map(|period| time::interval_at(Instant::now() + period, period));
    // Armed by a ping, cleared by any inbound message
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            msg = read.next() => {
                if matches!(msg, Some(Ok(_))) {
                    pong_deadline = None;
                }
                match msg {
                    Some(Ok(Message::Text(text))) => events.frame(text.to_string()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => events.frame(text),
                        Err(_) => warn!(generation, len = bytes.len(), "Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        warn!(generation, ?code, "WebSocket closed by server");
                        events.closed(code);
                        return;
                    }
                    Some(Ok(_)) => trace!(generation, "Control frame"),
                    Some(Err(e)) => {
                        error!(error = %e, generation, "WebSocket error");
                        events.failed(e.to_string());
                        return;
                    }
                    None => {
                        warn!(generation, "WebSocket stream ended");
                        events.closed(None);
                        return;
                    }
                }
            },
            cmd = commands.recv() => match cmd {
                Some(TransportCommand::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        error!(error = %e, generation, "Failed to send frame");
                        events.failed(e.to_string());
                        return;
                    }
                }
                Some(TransportCommand::Close(code)) => {
                    close_gracefully(&mut write, &mut read, code, close_timeout, generation).await;
                    events.closed(Some(code));
                    return;
                }
                None => {
                    // Handle dropped without an explicit close
                    close_gracefully(&mut write, &mut read, CLOSE_NORMAL, close_timeout, generation).await;
                    events.closed(Some(CLOSE_NORMAL));
                    return;
                }
            },
            _ = tick(ping.as_mut()) => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    error!(error = %e, generation, "Keepalive ping failed");
                    events.failed(e.to_string());
                    return;
                }
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + settings.pong_timeout);
                }
            }
            _ = expires(pong_deadline) => {
                warn!(
                    generation,
                    timeout_ms = settings.pong_timeout.as_millis() as u64,
                    "No traffic after keepalive ping, dropping connection"
                );
                events.failed("pong timeout");
                return;
            }
        }
    }
}

/// Wait for a close request, ignoring sends (nothing is open to send on)
async fn close_requested(commands: &mut UnboundedReceiver<TransportCommand>) -> u16 {
    loop {
        match commands.recv().await {
            Some(TransportCommand::Close(code)) => return code,
            Some(TransportCommand::Send(_)) => warn!("Dropping frame sent before transport opened"),
            None => return CLOSE_NORMAL,
        }
    }
}

async fn tick(ping: Option<&mut time::Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

async fn expires(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => future::pending::<()>().await,
    }
}

async fn close_gracefully<W, R>(
    write: &mut W,
    read: &mut R,
    code: u16,
    timeout: Duration,
    generation: Generation,
) where
    W: futures_util::Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
    R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    debug!(generation, code, "Closing WebSocket");
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    };
    if let Err(e) = write.send(Message::Close(Some(frame))).await {
        debug!(error = %e, generation, "Close frame not sent");
        return;
    }

    // Drain until the peer acknowledges; give up after the timeout
    let acked = time::timeout(timeout, async {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if acked.is_err() {
        warn!(generation, timeout_ms = timeout.as_millis() as u64, "Peer did not acknowledge close");
    }
}
