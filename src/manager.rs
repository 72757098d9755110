//! Realtime link: the public handle and the actor that owns the connection
//!
//! Every API call, transport event and timer expiry becomes a [`Signal`] on
//! one channel, and a single task applies them to the
//! [`ConnectionMachine`] in arrival order. Transitions are therefore
//! serialized and frames reach listeners in wire order.

use crate::config::LinkConfig;
use crate::core::encode_frame;
use crate::credentials::CredentialSource;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::handshake::auth_frame;
use crate::machine::{Command, ConnectionMachine, Generation, Input, TimerId};
use crate::registry::{Listener, SubscriberRegistry};
use crate::stats::{LinkStats, StatsSnapshot};
use crate::transport::{
    Connector, TransportEvent, TransportEvents, TransportHandle, TransportSettings, WsConnector,
};
use crate::ws_state::ConnectionState;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Actor inbox message
#[derive(Debug)]
pub(crate) enum Signal {
    Connect,
    Disconnect,
    Send(String),
    Transport {
        generation: Generation,
        event: TransportEvent,
    },
    RetryDue(TimerId),
    Shutdown,
}

/// Handle to the realtime link.
///
/// Cheap to clone; all clones drive the same connection. Dropping the last
/// clone tears the link down. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct RealtimeLink {
    inner: Arc<Shared>,
}

struct Shared {
    inbox: mpsc::UnboundedSender<Signal>,
    registry: Arc<SubscriberRegistry>,
    stats: Arc<LinkStats>,
    state: watch::Receiver<ConnectionState>,
    attempt: Arc<AtomicU32>,
    exhausted: Arc<AtomicBool>,
    endpoint: String,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let _ = self.inbox.send(Signal::Shutdown);
    }
}

impl RealtimeLink {
    /// Create a link that connects over WebSocket to the endpoint derived
    /// from `config`. Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: LinkConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        let connector = Arc::new(WsConnector::new(TransportSettings::from(&config)));
        Self::with_connector(config, credentials, connector)
    }

    pub fn with_connector(
        config: LinkConfig,
        credentials: Arc<dyn CredentialSource>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let endpoint = config.ws_endpoint()?;
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let registry = Arc::new(SubscriberRegistry::new());
        let stats = Arc::new(LinkStats::new());
        let attempt = Arc::new(AtomicU32::new(0));
        let exhausted = Arc::new(AtomicBool::new(false));

        let actor = LinkActor {
            machine: ConnectionMachine::new(config.backoff),
            endpoint: endpoint.clone(),
            connector,
            credentials,
            dispatcher: Dispatcher::new(registry.clone(), stats.clone()),
            inbox: inbox_tx.clone(),
            transport: None,
            retry_task: None,
            state: state_tx,
            attempt: attempt.clone(),
            exhausted: exhausted.clone(),
        };
        tokio::spawn(actor.run(inbox_rx));

        debug!(endpoint = %endpoint, "Realtime link created");
        Ok(Self {
            inner: Arc::new(Shared {
                inbox: inbox_tx,
                registry,
                stats,
                state: state_rx,
                attempt,
                exhausted,
                endpoint,
            }),
        })
    }

    /// Open the connection. No-op while connecting or open.
    pub fn connect(&self) {
        self.signal(Signal::Connect);
    }

    /// Close the connection with code 1000 and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.signal(Signal::Disconnect);
    }

    /// Send a frame on the open connection. Dropped (and logged) if the
    /// connection is not open or the frame cannot be encoded.
    pub fn send<T: Serialize + ?Sized>(&self, frame: &T) {
        match encode_frame(frame) {
            Ok(text) => self.signal(Signal::Send(text)),
            Err(e) => error!(error = %e, "Failed to encode outbound frame"),
        }
    }

    pub fn add_listener(&self, listener: &Listener) -> bool {
        self.inner.registry.add_listener(listener)
    }

    pub fn remove_listener(&self, listener: &Listener) -> bool {
        self.inner.registry.remove_listener(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.attempt.load(Ordering::Relaxed)
    }

    /// Every automatic retry failed; only an explicit
    /// [`connect`](Self::connect) will try again.
    pub fn retries_exhausted(&self) -> bool {
        self.inner.exhausted.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Not open and nothing delivered within `staleness`: the fallback
    /// poller should take over.
    pub fn is_degraded(&self, staleness: Duration) -> bool {
        !self.state().is_open() && self.inner.stats.is_stale(staleness)
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Close intentionally and stop the actor. The handle stays usable but
    /// further calls have no effect.
    pub fn shutdown(&self) {
        self.signal(Signal::Shutdown);
    }

    fn signal(&self, signal: Signal) {
        if self.inner.inbox.send(signal).is_err() {
            debug!("Realtime link already shut down");
        }
    }
}

struct LinkActor {
    machine: ConnectionMachine,
    endpoint: String,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    dispatcher: Dispatcher,
    /// Cloned into transports and retry timers
    inbox: mpsc::UnboundedSender<Signal>,
    transport: Option<(Generation, TransportHandle)>,
    retry_task: Option<JoinHandle<()>>,
    state: watch::Sender<ConnectionState>,
    attempt: Arc<AtomicU32>,
    exhausted: Arc<AtomicBool>,
}

impl LinkActor {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Signal>) {
        while let Some(signal) = inbox.recv().await {
            match signal {
                Signal::Connect => self.apply(Input::Connect),
                Signal::Disconnect => self.apply(Input::Disconnect),
                Signal::Send(text) => self.transmit(text),
                Signal::Transport { generation, event } => self.on_transport(generation, event),
                Signal::RetryDue(timer) => self.apply(Input::RetryDue(timer)),
                Signal::Shutdown => {
                    self.apply(Input::Disconnect);
                    break;
                }
            }
        }

        self.cancel_retry();
        debug!("Realtime link stopped");
    }

    fn on_transport(&mut self, generation: Generation, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.apply(Input::Opened(generation)),
            TransportEvent::Frame(text) => {
                if self.machine.accepts_frames_from(generation) {
                    self.dispatcher.dispatch_frame(&text);
                } else {
                    trace!(generation, "Ignoring frame from inactive transport");
                }
            }
            TransportEvent::Closed(code) => self.apply(Input::Closed { generation, code }),
            TransportEvent::Failed(reason) => self.apply(Input::Failed { generation, reason }),
        }
    }

    fn apply(&mut self, input: Input) {
        for command in self.machine.handle(input) {
            self.execute(command);
        }
        self.attempt.store(self.machine.attempt(), Ordering::Relaxed);
        self.exhausted.store(self.machine.is_exhausted(), Ordering::Relaxed);
        let state = self.machine.state();
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "State transition");
            *current = state;
            true
        });
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Open(generation) => {
                let events = TransportEvents::new(generation, self.inbox.clone());
                let handle = self.connector.open(&self.endpoint, events);
                self.transport = Some((generation, handle));
            }
            Command::Close { generation, code } => match &self.transport {
                Some((current, handle)) if *current == generation => {
                    handle.close(code);
                }
                _ => debug!(generation, "Close for a transport that is already gone"),
            },
            Command::Authenticate(generation) => {
                if let Some(frame) = auth_frame(self.credentials.as_ref()) {
                    match encode_frame(&frame) {
                        Ok(text) => self.send_on(generation, text),
                        Err(e) => error!(error = %e, "Failed to encode auth frame"),
                    }
                }
            }
            Command::ScheduleRetry { timer, delay } => {
                self.cancel_retry();
                info!(
                    attempt = self.machine.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                let inbox = self.inbox.clone();
                self.retry_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = inbox.send(Signal::RetryDue(timer));
                }));
            }
            Command::CancelRetry => self.cancel_retry(),
            Command::RetriesExhausted { attempts } => {
                warn!(attempts, "Reconnect attempts exhausted, waiting for an explicit connect()");
            }
        }
    }

    fn transmit(&mut self, text: String) {
        match self.machine.current_transport() {
            Some(generation) if self.machine.accepts_frames_from(generation) => {
                self.send_on(generation, text)
            }
            _ => warn!(state = %self.machine.state(), "Dropping outbound frame, connection not open"),
        }
    }

    fn send_on(&self, generation: Generation, text: String) {
        match &self.transport {
            Some((current, handle)) if *current == generation => {
                if !handle.send_text(text) {
                    debug!(generation, "Transport task gone, frame dropped");
                }
            }
            _ => debug!(generation, "No live transport, frame dropped"),
        }
    }

    fn cancel_retry(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }
}
