//! Resilient session manager for RESP key-value stores.
//!
//! A [`Session`] turns a raw, unreliable [`Transport`] into a single
//! always-addressable handle. It runs the post-connect handshake (AUTH,
//! SELECT, CLIENT SETNAME), queues commands issued before the connection is
//! ready, reconnects on failure according to the configured policy, and
//! shuts down safely even while a connect attempt is in flight.
//!
//! # Example
//!
//! ```no_run
//! use relink::{Event, Session, SessionConfig, TcpTransport};
//!
//! # async fn example() -> Result<(), relink::SessionError> {
//! let (session, mut events) = Session::new(
//!     SessionConfig {
//!         host: "127.0.0.1".to_string(),
//!         port: 6379,
//!         db: 2,
//!         ..Default::default()
//!     },
//!     TcpTransport::new(),
//! );
//!
//! // Queued until the handshake completes, then flushed in order.
//! let reply = session.raw_call(["SET", "greeting", "hello"])?.await?;
//! assert!(reply.is_ok());
//!
//! session.end();
//! while let Some(event) = events.recv().await {
//!     if event == Event::Ended {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod driver;
mod error;
mod event;
mod handshake;
pub mod logging;
mod queue;
mod reconnect;
mod tcp;
mod transport;

pub use config::{ConfigError, LogFormat, LoggingConfig, Retries, SessionConfig};
pub use driver::SessionState;
pub use error::SessionError;
pub use event::{Event, Events};
pub use handshake::Step;
pub use protocol_resp::Value;
pub use reconnect::{Backoff, Decision, ExponentialBackoff, FixedDelay, ReconnectPolicy};
pub use tcp::TcpTransport;
pub use transport::{Endpoint, ReplyCallback, Transport, TransportEvents};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

use driver::{Msg, SessionDriver};
use event::Notifier;

/// Handle to a resilient session.
///
/// Clone-able, Send + Sync. All clones address the same session. The session
/// ends on [`end`](Session::end) or when the last clone is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    tx: mpsc::UnboundedSender<Msg>,
    destroyed: Arc<AtomicBool>,
    state: watch::Receiver<SessionState>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Msg::End);
        }
    }
}

impl Session {
    /// Create a session over `transport` with the configured fixed-delay
    /// reconnect policy.
    ///
    /// Returns the session and a subscription that observes every event from
    /// the start. When `auto_connect` is set the first attempt begins
    /// immediately. Must be called from within a Tokio runtime.
    pub fn new<T: Transport>(config: SessionConfig, transport: T) -> (Self, Events) {
        let policy = ReconnectPolicy::from_config(&config);
        Self::with_policy(config, transport, policy)
    }

    /// Create a session with a custom reconnect policy.
    pub fn with_policy<T: Transport>(
        config: SessionConfig,
        transport: T,
        policy: ReconnectPolicy,
    ) -> (Self, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Created);
        let destroyed = Arc::new(AtomicBool::new(false));

        let mut notifier = Notifier::default();
        let events = notifier.subscribe();

        if config.auto_connect {
            let _ = tx.send(Msg::Connect);
        }

        let driver = SessionDriver::new(
            config,
            transport,
            policy,
            notifier,
            rx,
            tx.clone(),
            state_tx,
            destroyed.clone(),
        );
        tokio::spawn(driver.run());

        let session = Session {
            inner: Arc::new(SessionInner {
                tx,
                destroyed,
                state: state_rx,
            }),
        };
        (session, events)
    }

    /// Start a connect attempt. No-op if the session is destroyed, ready, or
    /// already connecting.
    pub fn connect(&self) {
        if self.is_destroyed() {
            return;
        }
        let _ = self.inner.tx.send(Msg::Connect);
    }

    /// Issue a command. Returns a future resolving to the reply.
    ///
    /// Commands issued before the session is ready are queued and sent in
    /// order once it is. If the session ends first, the reply resolves to
    /// [`SessionError::Cancelled`].
    pub fn raw_call<I, A>(&self, args: I) -> Result<PendingReply, SessionError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        let (tx, rx) = oneshot::channel();
        self.raw_call_with(args, move |result| {
            let _ = tx.send(result);
        })?;
        Ok(PendingReply { rx })
    }

    /// Issue a command with a completion callback.
    ///
    /// The callback runs on the session's transport context and must not
    /// block.
    pub fn raw_call_with<I, A, F>(&self, args: I, callback: F) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
        F: FnOnce(Result<Value, SessionError>) + Send + 'static,
    {
        let args = command_args(args)?;
        if self.is_destroyed() {
            return Err(SessionError::SessionDestroyed);
        }
        self.inner
            .tx
            .send(Msg::Call {
                args,
                reply: Box::new(callback),
            })
            .map_err(|_| SessionError::SessionDestroyed)
    }

    /// Issue a command without waiting for the reply. A failure is reported
    /// as [`Event::Error`].
    pub fn raw_call_detached<I, A>(&self, args: I) -> Result<(), SessionError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        let tx = self.inner.tx.clone();
        self.raw_call_with(args, move |result| {
            if let Err(e) = result {
                let _ = tx.send(Msg::CommandFailed(e));
            }
        })
    }

    /// Shut the session down.
    ///
    /// Sends QUIT when ready (unless disabled), discards queued commands,
    /// cancels timers and closes the transport. [`Event::Ended`] is emitted
    /// once; later calls are no-ops.
    pub fn end(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.tx.send(Msg::End);
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> Events {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.inner.tx.send(Msg::Subscribe(tx));
        Events::new(rx)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }
}

/// The reply to a command issued with [`Session::raw_call`].
#[must_use = "a reply does nothing unless awaited"]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Value, SessionError>>,
}

impl Future for PendingReply {
    type Output = Result<Value, SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SessionError::Cancelled)))
    }
}

fn command_args<I, A>(args: I) -> Result<Vec<Bytes>, SessionError>
where
    I: IntoIterator<Item = A>,
    A: Into<Bytes>,
{
    let args: Vec<Bytes> = args.into_iter().map(Into::into).collect();
    match args.first() {
        None => Err(SessionError::InvalidArgument(
            "command must have at least one argument".to_string(),
        )),
        Some(name) if name.is_empty() => Err(SessionError::InvalidArgument(
            "command name must not be empty".to_string(),
        )),
        Some(_) => Ok(args),
    }
}
