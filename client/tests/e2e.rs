//! End-to-end tests over real sockets.
//!
//! Each test starts an in-process RESP server on an ephemeral port and drives
//! a session through `TcpTransport`: connect, handshake, queued commands,
//! server-side disconnects, and shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use protocol_resp::Value;
use relink::{Event, Events, Retries, Session, SessionConfig, SessionError, TcpTransport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ── Test server ─────────────────────────────────────────────────────────

#[derive(Default)]
struct ServerState {
    data: HashMap<Vec<u8>, Vec<u8>>,
    /// Every command received, across all connections.
    log: Vec<Vec<String>>,
    connections: usize,
}

struct TestServer {
    addr: SocketAddr,
    password: Option<&'static str>,
    state: Arc<Mutex<ServerState>>,
}

impl TestServer {
    async fn start(password: Option<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServerState::default()));

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.lock().unwrap().connections += 1;
                tokio::spawn(serve(stream, password, shared.clone()));
            }
        });

        Self {
            addr,
            password,
            state,
        }
    }

    fn config(&self) -> SessionConfig {
        SessionConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            credential: self.password.map(str::to_string),
            name: Some("e2e".to_string()),
            reconnect_delay_ms: 50,
            connect_timeout_ms: 2000,
            ..Default::default()
        }
    }

    fn log(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().log.clone()
    }

    fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }
}

async fn serve(
    mut stream: TcpStream,
    password: Option<&'static str>,
    state: Arc<Mutex<ServerState>>,
) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut authed = password.is_none();

    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        while let Ok((value, consumed)) = Value::parse(&buf[..]) {
            buf.advance(consumed);
            let Value::Array(items) = value else {
                return;
            };
            let args: Vec<Vec<u8>> = items
                .into_iter()
                .filter_map(|v| v.as_bytes().map(<[u8]>::to_vec))
                .collect();
            let text: Vec<String> = args
                .iter()
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .collect();
            state.lock().unwrap().log.push(text.clone());

            let name = text[0].to_ascii_uppercase();
            let reply: Vec<u8> = match name.as_str() {
                "AUTH" => {
                    if Some(text[text.len() - 1].as_str()) == password {
                        authed = true;
                        b"+OK\r\n".to_vec()
                    } else {
                        b"-WRONGPASS invalid username-password pair\r\n".to_vec()
                    }
                }
                _ if !authed => b"-NOAUTH Authentication required.\r\n".to_vec(),
                "PING" => b"+PONG\r\n".to_vec(),
                "SELECT" | "CLIENT" => b"+OK\r\n".to_vec(),
                "SET" => {
                    state
                        .lock()
                        .unwrap()
                        .data
                        .insert(args[1].clone(), args[2].clone());
                    b"+OK\r\n".to_vec()
                }
                "GET" => {
                    let value = state.lock().unwrap().data.get(&args[1]).cloned();
                    match value {
                        Some(v) => {
                            let mut out = format!("${}\r\n", v.len()).into_bytes();
                            out.extend_from_slice(&v);
                            out.extend_from_slice(b"\r\n");
                            out
                        }
                        None => b"$-1\r\n".to_vec(),
                    }
                }
                "QUIT" => {
                    let _ = stream.write_all(b"+OK\r\n").await;
                    return;
                }
                // Sever the connection without replying.
                "DEBUG" => return,
                _ => format!("-ERR unknown command '{}'\r\n", text[0]).into_bytes(),
            };
            if stream.write_all(&reply).await.is_err() {
                return;
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

async fn next(events: &mut Events) -> Event {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

async fn wait_for(events: &mut Events, want: Event) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = next(events).await;
        let done = event == want;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn get_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_set_get() {
    let server = TestServer::start(None).await;
    let (session, mut events) = Session::new(server.config(), TcpTransport::new());

    // Issued before the connection is up; flushed once ready.
    let set = session.raw_call(["SET", "greeting", "hello"]).unwrap();
    let get = session.raw_call(["GET", "greeting"]).unwrap();

    assert_eq!(set.await, Ok(Value::SimpleString(b"OK".to_vec())));
    assert_eq!(get.await, Ok(Value::BulkString(b"hello".to_vec())));
    assert_eq!(next(&mut events).await, Event::Ready);
    assert_eq!(next(&mut events).await, Event::Connected);

    assert_eq!(
        session.raw_call(["GET", "missing"]).unwrap().await,
        Ok(Value::Null)
    );

    session.end();
    assert_eq!(
        wait_for(&mut events, Event::Ended).await,
        vec![Event::Disconnected, Event::Ended]
    );
}

#[tokio::test]
async fn test_handshake_order() {
    let server = TestServer::start(Some("secret")).await;
    let (session, mut events) = Session::new(
        SessionConfig {
            db: 2,
            ..server.config()
        },
        TcpTransport::new(),
    );

    let ping = session.raw_call(["PING"]).unwrap();
    assert_eq!(ping.await, Ok(Value::SimpleString(b"PONG".to_vec())));
    assert_eq!(next(&mut events).await, Event::Ready);

    let log = server.log();
    assert_eq!(log[0], vec!["AUTH", "secret"]);
    assert_eq!(log[1], vec!["SELECT", "2"]);
    assert_eq!(log[2], vec!["CLIENT", "SETNAME", "e2e"]);
    assert_eq!(log[3], vec!["PING"]);

    session.end();
    wait_for(&mut events, Event::Ended).await;
}

#[tokio::test]
async fn test_server_error_reaches_caller() {
    let server = TestServer::start(None).await;
    let (session, mut events) = Session::new(server.config(), TcpTransport::new());

    let reply = session.raw_call(["NOSUCH"]).unwrap().await;
    assert_eq!(
        reply,
        Err(SessionError::Server(
            "ERR unknown command 'NOSUCH'".to_string()
        ))
    );

    session.end();
    let seen = wait_for(&mut events, Event::Ended).await;
    assert!(!seen.iter().any(|e| matches!(e, Event::Error(_))));
}

#[tokio::test]
async fn test_wrong_password() {
    let server = TestServer::start(Some("secret")).await;
    let (session, mut events) = Session::new(
        SessionConfig {
            credential: Some("guess".to_string()),
            retry_enabled: false,
            ..server.config()
        },
        TcpTransport::new(),
    );
    let queued = session.raw_call(["PING"]).unwrap();

    assert_eq!(
        next(&mut events).await,
        Event::Error(SessionError::Authentication(
            "WRONGPASS invalid username-password pair".to_string()
        ))
    );
    assert_eq!(next(&mut events).await, Event::Error(SessionError::Terminal));
    assert_eq!(next(&mut events).await, Event::Ended);
    assert_eq!(queued.await, Err(SessionError::Cancelled));
}

#[tokio::test]
async fn test_reconnect_after_server_drop() {
    let server = TestServer::start(None).await;
    let (session, mut events) = Session::new(server.config(), TcpTransport::new());

    assert_eq!(next(&mut events).await, Event::Ready);
    assert_eq!(next(&mut events).await, Event::Connected);

    // The server hangs up on this one; the caller sees a transport error.
    let severed = session.raw_call(["DEBUG", "SLEEP"]).unwrap().await;
    assert!(matches!(severed, Err(SessionError::Transport(_))));

    let seen = wait_for(&mut events, Event::Connected).await;
    assert_eq!(seen[0], Event::Disconnected);
    assert!(seen.contains(&Event::Reconnecting { attempt: 1 }));
    assert!(!seen.contains(&Event::Ready));

    assert_eq!(
        session.raw_call(["PING"]).unwrap().await,
        Ok(Value::SimpleString(b"PONG".to_vec()))
    );
    assert_eq!(server.connections(), 2);

    session.end();
    wait_for(&mut events, Event::Ended).await;
}

#[tokio::test]
async fn test_connection_refused_exhausts_retries() {
    let port = get_available_port();
    let (session, mut events) = Session::new(
        SessionConfig {
            port,
            max_retries: Retries::Limited(2),
            reconnect_delay_ms: 10,
            ..Default::default()
        },
        TcpTransport::new(),
    );

    let seen = wait_for(&mut events, Event::Ended).await;
    let reconnects: Vec<&Event> = seen
        .iter()
        .filter(|e| matches!(e, Event::Reconnecting { .. }))
        .collect();
    assert_eq!(
        reconnects,
        vec![
            &Event::Reconnecting { attempt: 1 },
            &Event::Reconnecting { attempt: 2 }
        ]
    );
    assert!(seen.contains(&Event::Error(SessionError::Terminal)));
    assert!(session.is_destroyed());
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket() {
    let dir = std::env::temp_dir().join(format!("relink-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("redis.sock");
    let _ = std::fs::remove_file(&path);

    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = BytesMut::new();
            while let Ok(n) = stream.read_buf(&mut buf).await {
                if n == 0 {
                    break;
                }
                while let Ok((_, consumed)) = Value::parse(&buf[..]) {
                    buf.advance(consumed);
                    if stream.write_all(b"+PONG\r\n").await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    let (session, mut events) = Session::new(
        SessionConfig {
            host: path.to_string_lossy().into_owned(),
            skip_client_naming: true,
            ..Default::default()
        },
        TcpTransport::new(),
    );

    assert_eq!(
        session.raw_call(["PING"]).unwrap().await,
        Ok(Value::SimpleString(b"PONG".to_vec()))
    );
    session.end();
    wait_for(&mut events, Event::Ended).await;
    let _ = std::fs::remove_dir_all(&dir);
}
