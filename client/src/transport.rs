//! The transport adapter contract.
//!
//! A transport opens one connection at a time, sends individual commands with
//! a completion callback, and reports connection-state changes through the
//! [`TransportEvents`] sink it was handed in [`Transport::open`].
//!
//! Events may arrive from any thread and at any time, including after the
//! session has abandoned the attempt they belong to. Each sink is stamped
//! with its attempt, and the session discards events from stale attempts.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use protocol_resp::Value;
use tokio::sync::mpsc;

use crate::driver::Msg;
use crate::error::SessionError;

/// Completion callback for a single command.
pub type ReplyCallback = Box<dyn FnOnce(Result<Value, SessionError>) + Send + 'static>;

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Raw connection primitives consumed by a session.
///
/// The session owns its transport exclusively and calls it only from its
/// driver task.
pub trait Transport: Send + 'static {
    /// Begin connecting. Completion is reported through `events.connected()`.
    ///
    /// A synchronous error is treated exactly like an asynchronous connect
    /// failure.
    fn open(&mut self, endpoint: &Endpoint, events: TransportEvents) -> Result<(), SessionError>;

    /// Send one command. `reply` must be invoked exactly once, or dropped if
    /// the transport is torn down.
    fn send(&mut self, args: Vec<Bytes>, reply: ReplyCallback);

    /// Tear down the current connection or connection attempt. No
    /// `disconnected` event is expected for an explicit close.
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, endpoint: &Endpoint, events: TransportEvents) -> Result<(), SessionError> {
        (**self).open(endpoint, events)
    }

    fn send(&mut self, args: Vec<Bytes>, reply: ReplyCallback) {
        (**self).send(args, reply)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Connection-state sink handed to a transport for one connect attempt.
#[derive(Clone)]
pub struct TransportEvents {
    attempt: u64,
    tx: mpsc::UnboundedSender<Msg>,
}

impl TransportEvents {
    pub(crate) fn new(attempt: u64, tx: mpsc::UnboundedSender<Msg>) -> Self {
        Self { attempt, tx }
    }

    /// Report the outcome of the connect attempt.
    pub fn connected(&self, result: Result<(), String>) {
        let _ = self.tx.send(Msg::TransportConnected {
            attempt: self.attempt,
            result,
        });
    }

    /// Report that an established connection was severed.
    pub fn disconnected(&self, error: Option<String>) {
        let _ = self.tx.send(Msg::TransportDisconnected {
            attempt: self.attempt,
            error,
        });
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("attempt", &self.attempt)
            .finish()
    }
}
