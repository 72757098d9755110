//! Connection state machine
//!
//! Pure transition logic: every input returns the commands the driver must
//! execute. No I/O and no clock, so the whole lifecycle (including the
//! disconnect-vs-late-close race) is testable without a network.
//!
//! Each transport carries a generation number. Inputs tagged with a
//! generation other than the live one are stale and ignored.

use crate::backoff::BackoffPolicy;
use crate::ws_state::ConnectionState;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Normal-closure WebSocket close code
pub const CLOSE_NORMAL: u16 = 1000;

pub type Generation = u64;
pub type TimerId = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Connect,
    Disconnect,
    Opened(Generation),
    Closed {
        generation: Generation,
        code: Option<u16>,
    },
    Failed {
        generation: Generation,
        reason: String,
    },
    RetryDue(TimerId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Open a new transport tagged with this generation
    Open(Generation),
    Close {
        generation: Generation,
        code: u16,
    },
    /// Run the auth handshake on the freshly opened transport
    Authenticate(Generation),
    ScheduleRetry {
        timer: TimerId,
        delay: Duration,
    },
    CancelRetry,
    /// Automatic retries are used up; only an explicit connect resumes
    RetriesExhausted {
        attempts: u32,
    },
}

#[derive(Debug)]
pub struct ConnectionMachine {
    policy: BackoffPolicy,
    state: ConnectionState,
    attempt: u32,
    /// Live transport, from `Open` until its close/failure is reported
    current: Option<Generation>,
    next_generation: Generation,
    pending_timer: Option<TimerId>,
    next_timer: TimerId,
    /// `connect()` arrived while the previous transport was still closing
    connect_after_close: bool,
    exhausted: bool,
}

impl ConnectionMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempt: 0,
            current: None,
            next_generation: 1,
            pending_timer: None,
            next_timer: 1,
            connect_after_close: false,
            exhausted: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn current_transport(&self) -> Option<Generation> {
        self.current
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending_timer
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Inbound frames are only accepted from the live, open transport
    pub fn accepts_frames_from(&self, generation: Generation) -> bool {
        self.state == ConnectionState::Open && self.current == Some(generation)
    }

    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        trace!(state = %self.state, ?input, "Handling input");
        match input {
            Input::Connect => self.on_connect(),
            Input::Disconnect => self.on_disconnect(),
            Input::Opened(generation) => self.on_opened(generation),
            Input::Closed { generation, code } => self.on_closed(generation, code),
            Input::Failed { generation, reason } => self.on_failed(generation, &reason),
            Input::RetryDue(timer) => self.on_retry_due(timer),
        }
    }

    fn on_connect(&mut self) -> Vec<Command> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                debug!(state = %self.state, "connect() ignored, link already active");
                Vec::new()
            }
            ConnectionState::Closing => {
                debug!("connect() deferred until the closing transport is gone");
                self.connect_after_close = true;
                Vec::new()
            }
            ConnectionState::Disconnected => self.open_transport(Vec::new()),
            ConnectionState::Reconnecting => {
                let mut commands = Vec::new();
                if self.pending_timer.take().is_some() {
                    commands.push(Command::CancelRetry);
                }
                if self.exhausted {
                    info!(attempts = self.attempt, "Explicit connect() after exhausted retries, resetting budget");
                    self.exhausted = false;
                    self.attempt = 0;
                }
                self.open_transport(commands)
            }
        }
    }

    fn on_disconnect(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        self.connect_after_close = false;
        self.exhausted = false;
        self.attempt = 0;

        if self.pending_timer.take().is_some() {
            commands.push(Command::CancelRetry);
        }

        match (self.state, self.current) {
            (ConnectionState::Closing, _) => {}
            (_, Some(generation)) => {
                self.state = ConnectionState::Closing;
                commands.push(Command::Close {
                    generation,
                    code: CLOSE_NORMAL,
                });
            }
            (_, None) => self.state = ConnectionState::Disconnected,
        }
        commands
    }

    fn on_opened(&mut self, generation: Generation) -> Vec<Command> {
        if self.current != Some(generation) || self.state != ConnectionState::Connecting {
            trace!(generation, state = %self.state, "Ignoring stale open");
            return Vec::new();
        }
        info!(generation, "Transport open");
        self.state = ConnectionState::Open;
        self.attempt = 0;
        self.exhausted = false;
        vec![Command::Authenticate(generation)]
    }

    fn on_closed(&mut self, generation: Generation, code: Option<u16>) -> Vec<Command> {
        if self.current != Some(generation) {
            trace!(generation, ?code, "Ignoring close of stale transport");
            return Vec::new();
        }
        self.current = None;

        if self.state == ConnectionState::Closing {
            return self.finish_close();
        }
        if code == Some(CLOSE_NORMAL) {
            info!(generation, "Transport closed normally by peer");
            self.state = ConnectionState::Disconnected;
            return Vec::new();
        }
        warn!(generation, ?code, "Transport closed abnormally");
        self.schedule_retry()
    }

    fn on_failed(&mut self, generation: Generation, reason: &str) -> Vec<Command> {
        if self.current != Some(generation) {
            trace!(generation, reason, "Ignoring failure of stale transport");
            return Vec::new();
        }
        self.current = None;

        if self.state == ConnectionState::Closing {
            return self.finish_close();
        }
        warn!(generation, reason, "Transport failed");
        self.schedule_retry()
    }

    fn on_retry_due(&mut self, timer: TimerId) -> Vec<Command> {
        if self.pending_timer != Some(timer) || self.state != ConnectionState::Reconnecting {
            trace!(timer, "Ignoring stale retry timer");
            return Vec::new();
        }
        self.pending_timer = None;
        debug!(attempt = self.attempt, "Retry timer fired");
        self.open_transport(Vec::new())
    }

    fn finish_close(&mut self) -> Vec<Command> {
        self.state = ConnectionState::Disconnected;
        if std::mem::take(&mut self.connect_after_close) {
            return self.open_transport(Vec::new());
        }
        info!("Disconnected");
        Vec::new()
    }

    fn open_transport(&mut self, mut commands: Vec<Command>) -> Vec<Command> {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.current = Some(generation);
        self.state = ConnectionState::Connecting;
        commands.push(Command::Open(generation));
        commands
    }

    fn schedule_retry(&mut self) -> Vec<Command> {
        self.state = ConnectionState::Reconnecting;
        let mut commands = Vec::new();
        if self.pending_timer.take().is_some() {
            commands.push(Command::CancelRetry);
        }

        match self.policy.next_delay(self.attempt) {
            Some(delay) => {
                self.attempt += 1;
                let timer = self.next_timer;
                self.next_timer += 1;
                self.pending_timer = Some(timer);
                commands.push(Command::ScheduleRetry { timer, delay });
            }
            None => {
                self.exhausted = true;
                commands.push(Command::RetriesExhausted {
                    attempts: self.attempt,
                });
            }
        }
        commands
    }
}
