//! RESP transport over TCP or Unix domain sockets.
//!
//! Each `open` spawns a connection task on the current Tokio runtime. The
//! task writes commands in submission order and matches replies to callbacks
//! FIFO. Error replies are delivered as [`SessionError::Server`].

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use protocol_resp::{ParseError, Request, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::SessionError;
use crate::transport::{Endpoint, ReplyCallback, Transport, TransportEvents};

const READ_BUFFER_SIZE: usize = 16 * 1024;

enum Outbound {
    Command { args: Vec<Bytes>, reply: ReplyCallback },
    Close,
}

/// How a connection task stopped serving.
enum Exit {
    /// `close()` was called.
    Closed,
    /// The server closed the connection.
    Eof,
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Stream for S {}

/// Transport backed by a tokio socket.
pub struct TcpTransport {
    conn: Option<mpsc::UnboundedSender<Outbound>>,
    nodelay: bool,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            conn: None,
            nodelay: true,
        }
    }

    /// Enable or disable TCP_NODELAY (default: enabled).
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, endpoint: &Endpoint, events: TransportEvents) -> Result<(), SessionError> {
        self.close();
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run(endpoint.clone(), self.nodelay, rx, events));
        self.conn = Some(tx);
        Ok(())
    }

    fn send(&mut self, args: Vec<Bytes>, reply: ReplyCallback) {
        let Some(conn) = &self.conn else {
            reply(Err(SessionError::Transport("not connected".to_string())));
            return;
        };
        if let Err(mpsc::error::SendError(Outbound::Command { reply, .. })) =
            conn.send(Outbound::Command { args, reply })
        {
            reply(Err(SessionError::Transport("connection closed".to_string())));
        }
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.send(Outbound::Close);
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn connect(endpoint: &Endpoint, nodelay: bool) -> io::Result<Box<dyn Stream>> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(nodelay)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not supported on this platform",
        )),
    }
}

/// Connection task: connect, report, then serve until closed or severed.
async fn run(
    endpoint: Endpoint,
    nodelay: bool,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    events: TransportEvents,
) {
    let connected = tokio::select! {
        result = connect(&endpoint, nodelay) => result,
        () = closed_while_connecting(&mut rx) => {
            debug!(%endpoint, "connect abandoned");
            return;
        }
    };

    let stream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%endpoint, error = %e, "connect failed");
            events.connected(Err(e.to_string()));
            return;
        }
    };
    events.connected(Ok(()));

    match serve(stream, &mut rx).await {
        Ok(Exit::Closed) => debug!(%endpoint, "connection closed"),
        Ok(Exit::Eof) => events.disconnected(None),
        Err(e) => {
            warn!(%endpoint, error = %e, "connection error");
            events.disconnected(Some(e.to_string()));
        }
    }
}

/// Resolves once `close()` is called (or the transport is dropped) before
/// the connection is established. Commands sent meanwhile are failed.
async fn closed_while_connecting(rx: &mut mpsc::UnboundedReceiver<Outbound>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            Outbound::Command { reply, .. } => {
                reply(Err(SessionError::Transport("not connected".to_string())))
            }
            Outbound::Close => return,
        }
    }
}

async fn serve(
    stream: Box<dyn Stream>,
    rx: &mut mpsc::UnboundedReceiver<Outbound>,
) -> io::Result<Exit> {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut in_flight: VecDeque<ReplyCallback> = VecDeque::new();
    let mut read_buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
    let mut write_buf = Vec::with_capacity(4096);

    let result = loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Outbound::Command { args, reply }) => {
                    write_buf.clear();
                    Request::new(&args).encode(&mut write_buf);
                    in_flight.push_back(reply);
                    if let Err(e) = writer.write_all(&write_buf).await {
                        break Err(e);
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.shutdown().await;
                    break Ok(Exit::Closed);
                }
            },
            read = reader.read_buf(&mut read_buf) => match read {
                Ok(0) => break Ok(Exit::Eof),
                Ok(n) => {
                    trace!(bytes = n, "read");
                    if let Err(e) = dispatch_replies(&mut read_buf, &mut in_flight) {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            },
        }
    };

    let reason = match &result {
        Ok(Exit::Closed) => "connection closed".to_string(),
        Ok(Exit::Eof) => "connection closed by peer".to_string(),
        Err(e) => e.to_string(),
    };
    for reply in in_flight.drain(..) {
        reply(Err(SessionError::Transport(reason.clone())));
    }
    rx.close();
    while let Ok(msg) = rx.try_recv() {
        if let Outbound::Command { reply, .. } = msg {
            reply(Err(SessionError::Transport(reason.clone())));
        }
    }

    result
}

/// Complete callbacks for every full reply in `buf`.
fn dispatch_replies(
    buf: &mut BytesMut,
    in_flight: &mut VecDeque<ReplyCallback>,
) -> io::Result<()> {
    loop {
        match Value::parse(&buf[..]) {
            Ok((value, consumed)) => {
                buf.advance(consumed);
                let Some(reply) = in_flight.pop_front() else {
                    warn!("unsolicited reply");
                    continue;
                };
                match value {
                    Value::Error(msg) => reply(Err(SessionError::Server(
                        String::from_utf8_lossy(&msg).into_owned(),
                    ))),
                    value => reply(Ok(value)),
                }
            }
            Err(ParseError::Incomplete) => return Ok(()),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
}
