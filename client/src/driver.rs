//! The session state machine.
//!
//! A [`SessionDriver`] owns all mutable session state and runs on a single
//! tokio task. Everything that can change that state (caller operations,
//! transport events, reply callbacks, timer expiry) arrives as a [`Msg`] on
//! one channel, so transitions are serialized without locks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use protocol_resp::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::{Event, Notifier};
use crate::handshake::{Handshake, Step};
use crate::queue::CommandQueue;
use crate::reconnect::{Decision, ReconnectPolicy};
use crate::transport::{Endpoint, ReplyCallback, Transport, TransportEvents};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connect attempt has been made yet.
    Created,
    /// Waiting for the transport to connect.
    Connecting,
    /// Connected, running AUTH / SELECT / CLIENT SETNAME.
    Handshaking,
    /// Commands are sent directly.
    Ready,
    /// Connection lost or attempt failed; consulting the reconnect policy.
    Disconnected,
    /// Waiting for the reconnect delay to elapse.
    Reconnecting,
    /// Shut down. Terminal.
    Destroyed,
}

impl SessionState {
    /// True while a connect attempt (connect or handshake) is outstanding.
    pub fn is_connecting(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Handshaking)
    }
}

pub(crate) enum Msg {
    Connect,
    Call {
        args: Vec<Bytes>,
        reply: ReplyCallback,
    },
    Subscribe(mpsc::UnboundedSender<Event>),
    End,
    CommandFailed(SessionError),
    TransportConnected {
        attempt: u64,
        result: Result<(), String>,
    },
    TransportDisconnected {
        attempt: u64,
        error: Option<String>,
    },
    HandshakeReply {
        attempt: u64,
        step: Step,
        result: Result<Value, SessionError>,
    },
    ConnectTimeout {
        attempt: u64,
    },
    ReconnectTimer {
        timer: u64,
    },
    TeardownDeadline {
        attempt: u64,
    },
}

/// A pending reconnect timer. Aborted on cancel; the id guards against an
/// expiry message that was already in flight.
struct ReconnectTimer {
    id: u64,
    handle: JoinHandle<()>,
}

pub(crate) struct SessionDriver<T: Transport> {
    config: SessionConfig,
    endpoint: Endpoint,
    transport: Option<T>,
    rx: mpsc::UnboundedReceiver<Msg>,
    tx: mpsc::UnboundedSender<Msg>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    destroyed: Arc<AtomicBool>,
    queue: CommandQueue,
    policy: ReconnectPolicy,
    notifier: Notifier,
    handshake: Option<Handshake>,
    /// Id of the current connect attempt. Bumped whenever an attempt is
    /// abandoned so late events from it are ignored.
    attempt: u64,
    ever_ready: bool,
    /// The transport holds a connection or attempt that has not been closed.
    /// Each open is closed at most once.
    transport_open: bool,
    connect_timer: Option<JoinHandle<()>>,
    reconnect_timer: Option<ReconnectTimer>,
    next_timer_id: u64,
    /// Shutdown arrived while a connect attempt was outstanding; the
    /// transport is closed once that attempt resolves.
    teardown_pending: bool,
    teardown_timer: Option<JoinHandle<()>>,
}

impl<T: Transport> SessionDriver<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SessionConfig,
        transport: T,
        policy: ReconnectPolicy,
        notifier: Notifier,
        rx: mpsc::UnboundedReceiver<Msg>,
        tx: mpsc::UnboundedSender<Msg>,
        state_tx: watch::Sender<SessionState>,
        destroyed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            endpoint: config.endpoint(),
            config,
            transport: Some(transport),
            rx,
            tx,
            state: SessionState::Created,
            state_tx,
            destroyed,
            queue: CommandQueue::default(),
            policy,
            notifier,
            handshake: None,
            attempt: 0,
            ever_ready: false,
            transport_open: false,
            connect_timer: None,
            reconnect_timer: None,
            next_timer_id: 0,
            teardown_pending: false,
            teardown_timer: None,
        }
    }

    /// Process messages until the session is destroyed and fully torn down.
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            self.handle(msg);
            if self.state == SessionState::Destroyed && !self.teardown_pending {
                break;
            }
        }
        self.transport = None;
        debug!(endpoint = %self.endpoint, "session driver exited");
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Connect => self.connect(),
            Msg::Call { args, reply } => self.call(args, reply),
            Msg::Subscribe(tx) => self.notifier.add(tx),
            Msg::End => self.shutdown(),
            Msg::CommandFailed(err) => self.notifier.emit(Event::Error(err)),
            Msg::TransportConnected { attempt, result } => self.on_connect(attempt, result),
            Msg::TransportDisconnected { attempt, error } => self.on_disconnect(attempt, error),
            Msg::HandshakeReply {
                attempt,
                step,
                result,
            } => self.on_handshake_reply(attempt, step, result),
            Msg::ConnectTimeout { attempt } => self.on_connect_timeout(attempt),
            Msg::ReconnectTimer { timer } => self.on_reconnect_timer(timer),
            Msg::TeardownDeadline { attempt } => {
                if attempt == self.attempt && self.teardown_pending {
                    warn!(endpoint = %self.endpoint, "connect attempt did not resolve after shutdown");
                    self.teardown_timer = None;
                    self.finish_teardown();
                }
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(endpoint = %self.endpoint, from = ?self.state, to = ?state, "state transition");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    // ── Connect ─────────────────────────────────────────────────────────

    fn connect(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        if self.state.is_connecting() || self.state == SessionState::Ready {
            debug!(endpoint = %self.endpoint, state = ?self.state, "connect ignored");
            return;
        }
        self.cancel_reconnect_timer();

        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        self.attempt += 1;
        let attempt = self.attempt;
        debug!(endpoint = %self.endpoint, attempt, "connecting");
        let opened = transport.open(&self.endpoint, TransportEvents::new(attempt, self.tx.clone()));
        self.transport_open = true;
        self.set_state(SessionState::Connecting);
        match opened {
            Ok(()) => self.arm_connect_timer(attempt),
            Err(err) => self.connect_failed(err),
        }
    }

    fn arm_connect_timer(&mut self, attempt: u64) {
        self.cancel_connect_timer();
        let tx = self.tx.clone();
        let timeout = self.config.connect_timeout();
        self.connect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Msg::ConnectTimeout { attempt });
        }));
    }

    fn cancel_connect_timer(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
    }

    /// Abandon the outstanding attempt and consult the reconnect policy.
    fn connect_failed(&mut self, err: SessionError) {
        self.cancel_connect_timer();
        self.handshake = None;
        self.attempt += 1;
        self.close_transport();
        warn!(endpoint = %self.endpoint, error = %err, "connect attempt failed");
        self.set_state(SessionState::Disconnected);
        self.notifier.emit(Event::Error(err));
        self.reconnect();
    }

    fn on_connect(&mut self, attempt: u64, result: Result<(), String>) {
        if attempt != self.attempt {
            debug!(endpoint = %self.endpoint, attempt, "ignoring stale connect event");
            return;
        }
        if self.state == SessionState::Destroyed {
            self.finish_teardown();
            return;
        }
        if self.state != SessionState::Connecting {
            return;
        }

        match result {
            Ok(()) => {
                debug!(endpoint = %self.endpoint, attempt, "transport connected");
                self.set_state(SessionState::Handshaking);
                self.handshake = Some(Handshake::new(&self.config));
                self.advance_handshake();
            }
            Err(reason) => self.connect_failed(SessionError::Connect(reason)),
        }
    }

    fn on_connect_timeout(&mut self, attempt: u64) {
        if attempt != self.attempt || !self.state.is_connecting() {
            return;
        }
        self.connect_timer = None;
        self.connect_failed(SessionError::Connect("connection timeout".to_string()));
    }

    // ── Handshake ───────────────────────────────────────────────────────

    fn advance_handshake(&mut self) {
        loop {
            let next = match self.handshake.as_mut() {
                Some(handshake) => handshake.next_step(),
                None => return,
            };
            let Some((step, args)) = next else {
                self.handshake = None;
                self.become_ready();
                return;
            };
            let Some(transport) = self.transport.as_mut() else {
                return;
            };

            if step.awaits_reply() {
                debug!(endpoint = %self.endpoint, ?step, "handshake step");
                let tx = self.tx.clone();
                let attempt = self.attempt;
                transport.send(
                    args,
                    Box::new(move |result| {
                        let _ = tx.send(Msg::HandshakeReply {
                            attempt,
                            step,
                            result,
                        });
                    }),
                );
                return;
            }

            transport.send(
                args,
                Box::new(move |result| {
                    if let Err(e) = result {
                        debug!(?step, error = %e, "best-effort handshake step failed");
                    }
                }),
            );
        }
    }

    fn on_handshake_reply(&mut self, attempt: u64, step: Step, result: Result<Value, SessionError>) {
        if attempt != self.attempt {
            return;
        }
        if self.state == SessionState::Destroyed {
            self.finish_teardown();
            return;
        }
        if self.state != SessionState::Handshaking {
            return;
        }

        match result {
            Ok(Value::Error(msg)) => {
                let reason = String::from_utf8_lossy(&msg).into_owned();
                self.connect_failed(step.failure(reason));
            }
            Ok(_) => self.advance_handshake(),
            // Only a rejection by the server is a credential problem.
            Err(SessionError::Server(reason)) => self.connect_failed(step.failure(reason)),
            Err(err) => self.connect_failed(SessionError::Connect(err.to_string())),
        }
    }

    fn become_ready(&mut self) {
        self.cancel_connect_timer();
        self.set_state(SessionState::Ready);
        self.policy.reset();

        let flushed = match self.transport.as_mut() {
            Some(transport) if !self.queue.is_empty() => self.queue.drain_into(transport),
            _ => 0,
        };

        if !self.ever_ready {
            self.ever_ready = true;
            self.notifier.emit(Event::Ready);
        }
        self.notifier.emit(Event::Connected);
        info!(endpoint = %self.endpoint, flushed, "session ready");
    }

    // ── Disconnect / reconnect ──────────────────────────────────────────

    fn on_disconnect(&mut self, attempt: u64, error: Option<String>) {
        if attempt != self.attempt {
            debug!(endpoint = %self.endpoint, attempt, "ignoring stale disconnect event");
            return;
        }
        if self.state == SessionState::Destroyed {
            self.finish_teardown();
            return;
        }
        if !self.state.is_connecting() && self.state != SessionState::Ready {
            return;
        }

        self.cancel_connect_timer();
        self.handshake = None;
        self.attempt += 1;
        warn!(endpoint = %self.endpoint, error = ?error, "disconnected");
        self.set_state(SessionState::Disconnected);
        self.notifier.emit(Event::Disconnected);
        if let Some(reason) = error {
            self.notifier.emit(Event::Error(SessionError::Connect(reason)));
        }
        self.reconnect();
    }

    fn reconnect(&mut self) {
        match self.policy.next_attempt() {
            Decision::GiveUp => {
                warn!(
                    endpoint = %self.endpoint,
                    attempts = self.policy.attempt(),
                    "disconnected, exhausted retries"
                );
                self.notifier.emit(Event::Error(SessionError::Terminal));
                self.shutdown();
            }
            Decision::Retry { attempt, delay } => {
                info!(endpoint = %self.endpoint, attempt, ?delay, "reconnecting");
                self.set_state(SessionState::Reconnecting);
                self.notifier.emit(Event::Reconnecting { attempt });
                self.arm_reconnect_timer(delay);
            }
        }
    }

    fn arm_reconnect_timer(&mut self, delay: Duration) {
        self.cancel_reconnect_timer();
        self.next_timer_id += 1;
        let id = self.next_timer_id;
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Msg::ReconnectTimer { timer: id });
        });
        self.reconnect_timer = Some(ReconnectTimer { id, handle });
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.handle.abort();
        }
    }

    fn on_reconnect_timer(&mut self, id: u64) {
        match &self.reconnect_timer {
            Some(timer) if timer.id == id => {
                self.reconnect_timer = None;
                self.connect();
            }
            _ => debug!(timer = id, "ignoring cancelled reconnect timer"),
        }
    }

    // ── Commands ────────────────────────────────────────────────────────

    fn call(&mut self, args: Vec<Bytes>, reply: ReplyCallback) {
        match self.state {
            SessionState::Destroyed => reply(Err(SessionError::SessionDestroyed)),
            SessionState::Ready => match self.transport.as_mut() {
                Some(transport) => transport.send(args, reply),
                None => reply(Err(SessionError::SessionDestroyed)),
            },
            _ => {
                self.queue.push(args, reply);
                debug!(endpoint = %self.endpoint, queued = self.queue.len(), "command queued");
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    fn shutdown(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        let outstanding = self.state.is_connecting();

        if self.state == SessionState::Ready
            && !self.config.skip_quit_on_shutdown
            && let Some(transport) = self.transport.as_mut()
        {
            transport.send(vec![Bytes::from_static(b"QUIT")], Box::new(|_| {}));
        }

        self.destroyed.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Destroyed);

        // Queued commands are discarded; dropping their callbacks cancels
        // any `PendingReply` waiting on them.
        let discarded = self.queue.clear();
        if discarded > 0 {
            debug!(endpoint = %self.endpoint, discarded, "discarding queued commands");
        }
        self.cancel_connect_timer();
        self.cancel_reconnect_timer();
        self.handshake = None;

        if outstanding {
            // Closing now could race the attempt's completion. Close once it
            // resolves, or at the deadline if it never does.
            self.teardown_pending = true;
            let tx = self.tx.clone();
            let attempt = self.attempt;
            let deadline = self.config.connect_timeout();
            self.teardown_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                let _ = tx.send(Msg::TeardownDeadline { attempt });
            }));
        } else {
            self.attempt += 1;
            if self.ever_ready {
                self.close_transport();
            }
        }

        if self.ever_ready {
            self.notifier.emit(Event::Disconnected);
        }
        self.notifier.emit(Event::Ended);
        info!(endpoint = %self.endpoint, "session ended");
    }

    /// Close the transport after an attempt outstanding at shutdown resolved.
    fn finish_teardown(&mut self) {
        if !self.teardown_pending {
            return;
        }
        self.teardown_pending = false;
        if let Some(timer) = self.teardown_timer.take() {
            timer.abort();
        }
        self.attempt += 1;
        debug!(endpoint = %self.endpoint, "closing transport after abandoned connect");
        self.close_transport();
    }

    /// Close the current connection unless it was already closed.
    fn close_transport(&mut self) {
        if !self.transport_open {
            return;
        }
        self.transport_open = false;
        if let Some(transport) = self.transport.as_mut() {
            transport.close();
        }
    }
}
