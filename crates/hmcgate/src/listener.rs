//! Front-end listener: plain TCP or rustls, with per-connection deadlines.
//!
//! `axum::serve` drives a [`GateListener`]. Accepting and TLS handshakes run
//! on a background task so a slow handshake never blocks other clients.

use std::fmt::Display;
use std::fs::File;
use std::future::Future;
use std::io::{self, BufReader, IoSlice};
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::{IncomingStream, Listener};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep, sleep};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::{
    self, ProtocolVersion,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hmcgate_config::ServerTls;

use crate::error::CliError;

/// Budget for the TLS handshake and for the first bytes of a new connection.
pub const READ_TIMEOUT: Duration = Duration::from_secs(15);
/// Longest a response write may make no progress.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
/// Keep-alive connections with no inbound traffic are closed after this.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

const ACCEPT_QUEUE: usize = 64;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

// ── TLS material ────────────────────────────────────────────────────

/// Build the HTTPS acceptor from a PEM certificate chain and key.
///
/// TLS 1.2 is the floor; 1.3 is preferred.
pub fn tls_acceptor(files: &ServerTls) -> Result<TlsAcceptor, CliError> {
    let certs = load_certs(&files.cert)?;
    let key = load_key(&files.key)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| tls_error(&files.cert, &e))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| tls_error(&files.key, &e))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn tls_error(path: &Path, err: &dyn Display) -> CliError {
    CliError::Tls {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, CliError> {
    let mut reader = BufReader::new(File::open(path).map_err(|e| tls_error(path, &e))?);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|e| tls_error(path, &e))?;
    if certs.is_empty() {
        return Err(tls_error(path, &"no certificates found"));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, CliError> {
    let mut reader = BufReader::new(File::open(path).map_err(|e| tls_error(path, &e))?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| tls_error(path, &e))?
        .ok_or_else(|| tls_error(path, &"no private key found"))
}

fn protocol_name(version: Option<ProtocolVersion>) -> &'static str {
    match version {
        Some(ProtocolVersion::TLSv1_3) => "TLS1.3",
        Some(ProtocolVersion::TLSv1_2) => "TLS1.2",
        _ => "TLS",
    }
}

// ── Connection ──────────────────────────────────────────────────────

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// An accepted connection with inbound and outbound deadlines.
///
/// Reads must start within [`READ_TIMEOUT`]; after the first bytes the
/// budget becomes [`IDLE_TIMEOUT`] since the last inbound data. A write
/// that stays pending for [`WRITE_TIMEOUT`] fails the connection.
pub struct Conn {
    io: Box<dyn Stream>,
    tls: Option<&'static str>,
    read_deadline: Pin<Box<Sleep>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl Conn {
    fn new(io: Box<dyn Stream>, tls: Option<&'static str>) -> Self {
        Self {
            io,
            tls,
            read_deadline: Box::pin(sleep(READ_TIMEOUT)),
            write_deadline: None,
        }
    }

    /// Negotiated TLS version, `None` for plain HTTP.
    pub fn tls_version(&self) -> Option<&'static str> {
        self.tls
    }

    fn guard_write<T>(&mut self, cx: &mut Context<'_>, polled: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
        if polled.is_ready() {
            self.write_deadline = None;
            return polled;
        }
        let deadline = self
            .write_deadline
            .get_or_insert_with(|| Box::pin(sleep(WRITE_TIMEOUT)));
        match deadline.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(timed_out("response write stalled"))),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, what.to_owned())
}

impl AsyncRead for Conn {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        match Pin::new(&mut this.io).poll_read(cx, buf) {
            Poll::Ready(result) => {
                if buf.filled().len() > before {
                    this.read_deadline.as_mut().reset(Instant::now() + IDLE_TIMEOUT);
                }
                Poll::Ready(result)
            }
            Poll::Pending => match this.read_deadline.as_mut().poll(cx) {
                Poll::Ready(()) => Poll::Ready(Err(timed_out("connection idle"))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.io).poll_write(cx, buf);
        this.guard_write(cx, polled)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.io).poll_write_vectored(cx, bufs);
        this.guard_write(cx, polled)
    }

    fn is_write_vectored(&self) -> bool {
        self.io.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let polled = Pin::new(&mut this.io).poll_flush(cx);
        this.guard_write(cx, polled)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

// ── Listener ────────────────────────────────────────────────────────

/// Connection details handed to handlers as `ConnectInfo<PeerInfo>`.
#[derive(Debug, Clone, Copy)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub tls: Option<&'static str>,
}

impl Connected<IncomingStream<'_, GateListener>> for PeerInfo {
    fn connect_info(stream: IncomingStream<'_, GateListener>) -> Self {
        Self {
            addr: *stream.remote_addr(),
            tls: stream.io().tls_version(),
        }
    }
}

/// Plain or HTTPS listener for `axum::serve`.
pub struct GateListener {
    incoming: mpsc::Receiver<(Conn, SocketAddr)>,
    local_addr: SocketAddr,
}

impl GateListener {
    /// Bind `addr` and start accepting until `shutdown` is cancelled.
    pub async fn bind(addr: SocketAddr, tls: Option<TlsAcceptor>, shutdown: CancellationToken) -> io::Result<Self> {
        let tcp = TcpListener::bind(addr).await?;
        let local_addr = tcp.local_addr()?;
        info!(addr = %local_addr, https = tls.is_some(), "listening");

        let (tx, incoming) = mpsc::channel(ACCEPT_QUEUE);
        tokio::spawn(accept_loop(tcp, tls, tx, shutdown));
        Ok(Self { incoming, local_addr })
    }
}

impl Listener for GateListener {
    type Io = Conn;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Conn, SocketAddr) {
        match self.incoming.recv().await {
            Some(accepted) => accepted,
            // Accept loop stopped: shutdown is under way.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

async fn accept_loop(
    tcp: TcpListener,
    tls: Option<TlsAcceptor>,
    tx: mpsc::Sender<(Conn, SocketAddr)>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = tcp.accept() => accepted,
        };
        let (socket, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, "accept failed");
                sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        match &tls {
            Some(acceptor) => {
                tokio::spawn(handshake(acceptor.clone(), socket, peer, tx.clone()));
            }
            None => {
                if tx.send((Conn::new(Box::new(socket), None), peer)).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("accept loop stopped");
}

async fn handshake(acceptor: TlsAcceptor, socket: TcpStream, peer: SocketAddr, tx: mpsc::Sender<(Conn, SocketAddr)>) {
    let stream = match tokio::time::timeout(READ_TIMEOUT, acceptor.accept(socket)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(error = %e, %peer, "TLS handshake failed");
            return;
        }
        Err(_) => {
            warn!(%peer, "TLS handshake timed out");
            return;
        }
    };

    let version = protocol_name(stream.get_ref().1.protocol_version());
    debug!(%peer, tls = version, "TLS handshake complete");
    if tx.send((Conn::new(Box::new(stream), Some(version)), peer)).await.is_err() {
        debug!(%peer, "listener closed before the connection was served");
    }
}
