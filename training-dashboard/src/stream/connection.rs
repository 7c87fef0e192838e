//! Socket transport for training updates.
//!
//! The ingest state machine only sees [`ConnectionEvent`]s pulled from a
//! [`Connection`]. The WebSocket transport runs the blocking `tungstenite`
//! client on a reader thread and forwards its events over a channel, so the
//! UI thread still handles exactly one event at a time.

use std::io::ErrorKind;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tungstenite::handshake::HandshakeError;
use tungstenite::http::Uri;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// How long the reader thread blocks on the socket before checking for a
/// close request. Applies to the handshake as well.
const READ_POLL: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsSocket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake completed.
    Opened,
    /// A text (or UTF-8 decoded binary) frame.
    Frame(String),
    /// Terminal transport failure.
    Error(String),
    /// Remote side closed the connection.
    Closed,
}

/// Source of connection events with an explicit release.
pub trait Connection {
    /// Wait up to `timeout` for the next event.
    fn next_event(&mut self, timeout: Duration) -> Option<ConnectionEvent>;

    /// Release the underlying connection. Called at most once by the ingest.
    fn close(&mut self);
}

/// Producer half of a [`ChannelConnection`].
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<ConnectionEvent>,
    close_requests: Arc<AtomicUsize>,
}

impl EventSender {
    /// Push an event. Returns false once the consumer is gone.
    pub fn send(&self, event: ConnectionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Whether the consumer asked for the connection to be released.
    pub fn close_requested(&self) -> bool {
        self.close_requests.load(Ordering::SeqCst) > 0
    }

    /// How many times the consumer called [`Connection::close`].
    pub fn close_count(&self) -> usize {
        self.close_requests.load(Ordering::SeqCst)
    }
}

/// A [`Connection`] fed through an in-process channel.
///
/// Transports (and tests) push events through the paired [`EventSender`].
#[derive(Debug)]
pub struct ChannelConnection {
    rx: Receiver<ConnectionEvent>,
    close_requests: Arc<AtomicUsize>,
    disconnected: bool,
}

impl ChannelConnection {
    /// Create a connected sender/connection pair.
    pub fn pair() -> (EventSender, ChannelConnection) {
        let (tx, rx) = mpsc::channel();
        let close_requests = Arc::new(AtomicUsize::new(0));
        (
            EventSender {
                tx,
                close_requests: Arc::clone(&close_requests),
            },
            ChannelConnection {
                rx,
                close_requests,
                disconnected: false,
            },
        )
    }
}

impl Connection for ChannelConnection {
    fn next_event(&mut self, timeout: Duration) -> Option<ConnectionEvent> {
        if self.disconnected {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // producer vanished without saying goodbye
                self.disconnected = true;
                Some(ConnectionEvent::Closed)
            }
        }
    }

    fn close(&mut self) {
        self.close_requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// WebSocket client connection backed by a reader thread.
///
/// The reader opens the TCP stream itself and shares a handle with this
/// struct, so [`Connection::close`] can shut the socket down immediately,
/// including mid-handshake.
#[derive(Debug)]
pub struct WsConnection {
    inner: ChannelConnection,
    socket: SharedSocket,
    url: String,
}

type SharedSocket = Arc<Mutex<Option<TcpStream>>>;

impl WsConnection {
    /// Start connecting to `url` in the background.
    ///
    /// Returns immediately; the handshake outcome arrives as
    /// [`ConnectionEvent::Opened`] or [`ConnectionEvent::Error`].
    pub fn connect(url: impl Into<String>) -> std::io::Result<Self> {
        let url = url.into();
        let (sender, inner) = ChannelConnection::pair();
        let socket = SharedSocket::default();
        let thread_url = url.clone();
        let thread_socket = Arc::clone(&socket);
        thread::Builder::new()
            .name("ws-reader".to_string())
            .spawn(move || reader_loop(&thread_url, &sender, &thread_socket))?;
        Ok(Self { inner, socket, url })
    }
}

impl Connection for WsConnection {
    fn next_event(&mut self, timeout: Duration) -> Option<ConnectionEvent> {
        self.inner.next_event(timeout)
    }

    fn close(&mut self) {
        tracing::debug!(url = %self.url, "releasing websocket connection");
        self.inner.close();
        release_socket(&self.socket);
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        release_socket(&self.socket);
    }
}

fn release_socket(socket: &SharedSocket) {
    let guard = socket.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(stream) = guard.as_ref() {
        let _ = stream.shutdown(Shutdown::Both);
    }
}

fn reader_loop(url: &str, sender: &EventSender, shared: &SharedSocket) {
    read_until_done(url, sender, shared);

    let handle = shared.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(stream) = handle {
        let _ = stream.shutdown(Shutdown::Both);
    }
}

fn read_until_done(url: &str, sender: &EventSender, shared: &SharedSocket) {
    let mut socket = match open(url, sender, shared) {
        Ok(Some(socket)) => socket,
        Ok(None) => return,
        Err(reason) => {
            if !sender.close_requested() {
                tracing::warn!(url, error = %reason, "websocket connect failed");
                sender.send(ConnectionEvent::Error(reason));
            }
            return;
        }
    };

    tracing::info!(url, "websocket open");
    if !sender.send(ConnectionEvent::Opened) {
        shutdown(&mut socket);
        return;
    }

    loop {
        if sender.close_requested() {
            shutdown(&mut socket);
            return;
        }

        let event = match socket.read() {
            Ok(Message::Text(text)) => ConnectionEvent::Frame(text.to_string()),
            Ok(Message::Binary(bytes)) => {
                ConnectionEvent::Frame(String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok(Message::Close(_)) => {
                tracing::info!(url, "websocket closed by server");
                ConnectionEvent::Closed
            }
            // ping/pong are answered by tungstenite on the next read or flush
            Ok(_) => continue,
            Err(tungstenite::Error::Io(e)) if is_timeout(&e) => continue,
            Err(_) if sender.close_requested() => return,
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                ConnectionEvent::Closed
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "websocket read failed");
                ConnectionEvent::Error(e.to_string())
            }
        };

        let terminal = matches!(event, ConnectionEvent::Closed | ConnectionEvent::Error(_));
        if !sender.send(event) || terminal {
            shutdown(&mut socket);
            return;
        }
    }
}

/// Connect and run the handshake, polling for close requests throughout.
///
/// `Ok(None)` means the consumer released the connection first.
fn open(
    url: &str,
    sender: &EventSender,
    shared: &SharedSocket,
) -> Result<Option<WsSocket>, String> {
    let uri: Uri = url.parse().map_err(|e| format!("invalid url: {e}"))?;
    let host = uri.host().ok_or_else(|| "url has no host".to_string())?;
    let port = uri
        .port_u16()
        .unwrap_or(if uri.scheme_str() == Some("wss") { 443 } else { 80 });

    let stream = connect_tcp(host, port).map_err(|e| e.to_string())?;
    stream
        .set_read_timeout(Some(READ_POLL))
        .and_then(|()| stream.set_write_timeout(Some(WRITE_TIMEOUT)))
        .map_err(|e| e.to_string())?;

    // publish the handle before checking for close, so a concurrent close
    // either sees the stream or is seen here
    {
        let handle = stream.try_clone().map_err(|e| e.to_string())?;
        let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(handle);
    }
    if sender.close_requested() {
        let _ = stream.shutdown(Shutdown::Both);
        return Ok(None);
    }

    let mut attempt = tungstenite::client_tls(url, stream);
    loop {
        match attempt {
            Ok((socket, _response)) => return Ok(Some(socket)),
            Err(HandshakeError::Interrupted(mid)) => {
                if sender.close_requested() {
                    return Ok(None);
                }
                attempt = mid.handshake();
            }
            Err(HandshakeError::Failure(_)) if sender.close_requested() => return Ok(None),
            Err(HandshakeError::Failure(e)) => return Err(e.to_string()),
        }
    }
}

fn connect_tcp(host: &str, port: u16) -> std::io::Result<TcpStream> {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(ErrorKind::NotFound, format!("no address for {host}:{port}"))
    }))
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn shutdown(socket: &mut WsSocket) {
    if let Err(e) = socket.close(None) {
        tracing::debug!(error = %e, "websocket close handshake skipped");
    }
    let _ = socket.flush();
}
