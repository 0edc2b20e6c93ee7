/*
 * net.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gemini Core.
 *
 * Gemini Core is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gemini Core is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gemini Core.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Blocking TLS channels: TcpStream wrapped with rustls, implicit TLS on connect.
//!
//! The handshake completes inside [`Connector::establish`]; the returned [`TlsStream`]
//! is ready for the request line.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, OnceLock};

use rustls::client::ClientConfig;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConnection, ProtocolVersion, StreamOwned};

use crate::config::{SessionConfig, Timeouts};
use crate::error::{Error, Result};
use crate::verify::CertificatePolicy;

/// Port used when the caller does not name one.
pub const DEFAULT_PORT: u16 = 1965;

/// `None` means "unspecified" and resolves to [`DEFAULT_PORT`].
pub fn effective_port(port: Option<u16>) -> u16 {
    port.unwrap_or(DEFAULT_PORT)
}

/// A bidirectional byte channel owned by one session.
pub trait Channel: Read + Write {
    /// Release the channel. Calling it again is a no-op.
    fn close(&mut self) -> io::Result<()>;
}

/// Socket errors that only mean the other side is already gone.
fn already_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

/// Server name for SNI and verification. IPv6 literals may arrive bracketed.
///
/// Names are sent as SNI. IP literals are not: RFC 6066 forbids literal addresses in the
/// server_name extension, so rustls omits it and the server falls back to its default
/// certificate.
fn server_name(host: &str) -> Result<ServerName<'static>> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(bare)
        .map(|name| name.to_owned())
        .map_err(|_| Error::Transport {
            context: "server name",
            source: io::Error::new(io::ErrorKind::InvalidInput, "invalid host name"),
        })
}

/// TLS stream over a blocking TcpStream.
pub struct TlsStream {
    inner: StreamOwned<ClientConnection, TcpStream>,
    closed: bool,
}

impl TlsStream {
    /// Certificates the server presented, end-entity first.
    pub fn peer_certificates(&self) -> Option<&[CertificateDer<'static>]> {
        self.inner.conn.peer_certificates()
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.inner.conn.protocol_version()
    }

    /// Handle that can abort this stream from another thread.
    pub fn cancel_handle(&self) -> io::Result<CancelHandle> {
        Ok(CancelHandle {
            sock: self.inner.sock.try_clone()?,
        })
    }
}

impl fmt::Debug for TlsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStream")
            .field("peer", &self.inner.sock.peer_addr().ok())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Channel for TlsStream {
    /// Sends close_notify, then shuts down the read half, the write half, and the socket.
    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.inner.conn.send_close_notify();
        let mut result = Ok(());
        while self.inner.conn.wants_write() {
            if let Err(e) = self.inner.conn.write_tls(&mut self.inner.sock) {
                result = Err(e);
                break;
            }
        }
        for how in [Shutdown::Read, Shutdown::Write] {
            if let Err(e) = self.inner.sock.shutdown(how) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        match result {
            Err(e) if already_closed(&e) => {
                tracing::trace!(error = %e, "peer already closed");
                Ok(())
            }
            other => other,
        }
    }
}

/// Aborts a blocked session from another thread by shutting its socket down.
#[derive(Debug)]
pub struct CancelHandle {
    sock: TcpStream,
}

impl CancelHandle {
    /// Pending and later reads/writes on the session fail or see end of stream.
    pub fn cancel(&self) -> io::Result<()> {
        match self.sock.shutdown(Shutdown::Both) {
            Err(e) if !already_closed(&e) => Err(e),
            _ => Ok(()),
        }
    }
}

/// Opens TLS channels with one client configuration.
#[derive(Debug, Clone)]
pub struct Connector {
    tls: Arc<ClientConfig>,
    policy: Arc<dyn CertificatePolicy>,
    timeouts: Timeouts,
}

static DEFAULT_CONNECTOR: OnceLock<Connector> = OnceLock::new();

impl Connector {
    /// `policy` is told about each completed handshake; it should be the one behind `tls`.
    pub fn new(
        tls: Arc<ClientConfig>,
        policy: Arc<dyn CertificatePolicy>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            tls,
            policy,
            timeouts,
        }
    }

    /// Shared connector with the accept-any policy and no deadlines.
    pub fn default_connector() -> Result<&'static Connector> {
        if let Some(connector) = DEFAULT_CONNECTOR.get() {
            return Ok(connector);
        }
        let connector = SessionConfig::new().connector()?;
        Ok(DEFAULT_CONNECTOR.get_or_init(|| connector))
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Connect to `host:port` (default port when `None`) and complete the TLS handshake.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn establish(&self, host: &str, port: Option<u16>) -> Result<TlsStream> {
        let port = effective_port(port);
        let name = server_name(host)?;
        let tcp = self.connect_tcp(host, port)?;
        tcp.set_read_timeout(self.timeouts.read)
            .map_err(Error::transport("set read timeout"))?;
        tcp.set_write_timeout(self.timeouts.write)
            .map_err(Error::transport("set write timeout"))?;

        let conn = ClientConnection::new(self.tls.clone(), name.clone())?;
        let mut inner = StreamOwned::new(conn, tcp);
        while inner.conn.is_handshaking() {
            inner
                .conn
                .complete_io(&mut inner.sock)
                .map_err(Error::transport("TLS handshake"))?;
        }
        tracing::debug!(version = ?inner.conn.protocol_version(), "TLS handshake complete");
        if let Some(end_entity) = inner.conn.peer_certificates().and_then(|certs| certs.first()) {
            self.policy.handshake_completed(&name, end_entity);
        }
        Ok(TlsStream {
            inner,
            closed: false,
        })
    }

    /// Try each resolved address in turn; report the last failure if none connects.
    fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream> {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        let addrs = (bare, port)
            .to_socket_addrs()
            .map_err(Error::transport("resolve"))?;
        let mut last_err = None;
        for addr in addrs {
            let attempt = match self.timeouts.connect {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(tcp) => {
                    tracing::debug!(%addr, "tcp connected");
                    return Ok(tcp);
                }
                Err(e) => {
                    tracing::trace!(%addr, error = %e, "tcp connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        let e = last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
        });
        Err(Error::transport("connect")(e))
    }
}
