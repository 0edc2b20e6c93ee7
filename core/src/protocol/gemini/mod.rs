/*
 * mod.rs
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

//! Gemini session: one request, one status line, then the body until the server closes.
//!
//! A [`Session`] only exists once the status line has been parsed, so the body cannot be
//! read before `code` and `meta` are known. Any failure before that closes the channel and
//! returns the error instead of a session.

pub mod client;
pub mod status;

use std::io::{self, BufRead, BufReader, Read, Write};

pub use client::{exchange, read_status_line, write_request, MAX_STATUS_LINE};
pub use status::{parse_status, parse_status_bytes, StatusCategory, StatusLine};

use crate::error::{Error, Result};
use crate::net::{CancelHandle, Channel, Connector, TlsStream};
use crate::uri::Target;

/// Where a live session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Status line parsed, body untouched.
    HeaderParsed,
    /// At least one body read has happened.
    BodyStreaming,
    Closed,
}

/// Buffered reads, unbuffered writes, over the same channel.
struct Duplex<'a, C>(&'a mut BufReader<C>);

impl<C: Read> Read for Duplex<'_, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<C: Read> BufRead for Duplex<'_, C> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.0.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.0.consume(amt)
    }
}

impl<C: Write> Write for Duplex<'_, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.get_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.get_mut().flush()
    }
}

/// A completed Gemini request: status code, meta, and the still-open body stream.
pub struct Session<C: Channel = TlsStream> {
    status: StatusLine,
    channel: Option<BufReader<C>>,
    state: SessionState,
    truncated: bool,
}

impl<C: Channel> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.status)
            .field("state", &self.state)
            .field("truncated", &self.truncated)
            .finish()
    }
}

impl Session<TlsStream> {
    /// Open a TLS channel to `host:port` (1965 when `None`), send `request_line`, parse the
    /// status line.
    #[tracing::instrument(skip(connector), level = "debug")]
    pub fn connect(
        host: &str,
        port: Option<u16>,
        request_line: &str,
        connector: &Connector,
    ) -> Result<Self> {
        let channel = connector.establish(host, port)?;
        Self::from_channel(channel, request_line)
    }

    /// Handle for aborting this session's blocking reads from another thread.
    pub fn cancel_handle(&self) -> Result<CancelHandle> {
        let channel = self.channel.as_ref().ok_or_else(|| Error::Transport {
            context: "cancel handle",
            source: io::Error::new(io::ErrorKind::NotConnected, "session closed"),
        })?;
        channel
            .get_ref()
            .cancel_handle()
            .map_err(Error::transport("cancel handle"))
    }
}

impl<C: Channel> Session<C> {
    /// Run the exchange over an already established channel.
    pub fn from_channel(channel: C, request_line: &str) -> Result<Self> {
        let mut reader = BufReader::new(channel);
        let parsed = exchange(&mut Duplex(&mut reader), request_line)
            .and_then(|raw| parse_status_bytes(&raw));
        match parsed {
            Ok(status) => {
                tracing::debug!(code = status.code, meta = %status.meta, "status line");
                Ok(Self {
                    status,
                    channel: Some(reader),
                    state: SessionState::HeaderParsed,
                    truncated: false,
                })
            }
            Err(e) => {
                tracing::debug!(error = %e, "exchange failed, closing channel");
                if let Err(close_err) = reader.get_mut().close() {
                    tracing::debug!(error = %close_err, "close after failed exchange");
                }
                Err(e)
            }
        }
    }

    pub fn code(&self) -> u32 {
        self.status.code
    }

    pub fn meta(&self) -> &str {
        &self.status.meta
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once the body ended with the connection dropping instead of a TLS close_notify.
    /// Gemini has no content length, so the body may or may not be complete.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// The underlying channel, until the session is closed.
    pub fn channel(&self) -> Option<&C> {
        self.channel.as_ref().map(BufReader::get_ref)
    }

    /// Body bytes, starting right after the status line terminator.
    pub fn body(&mut self) -> Body<'_, C> {
        Body {
            channel: self.channel.as_mut(),
            state: &mut self.state,
            truncated: &mut self.truncated,
        }
    }

    /// Read the body until the server closes the connection.
    pub fn read_body_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.body()
            .read_to_end(&mut out)
            .map_err(Error::transport("read body"))?;
        Ok(out)
    }

    /// Release the channel. Further calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut reader) = self.channel.take() else {
            return Ok(());
        };
        self.state = SessionState::Closed;
        tracing::trace!("closing session");
        reader
            .get_mut()
            .close()
            .map_err(Error::transport("close"))
    }
}

impl<C: Channel> Drop for Session<C> {
    fn drop(&mut self) {
        if let Some(mut reader) = self.channel.take() {
            if let Err(e) = reader.get_mut().close() {
                tracing::warn!(error = %e, "closing dropped session");
            }
        }
    }
}

/// Reader over a session's body. Fails with `NotConnected` once the session is closed.
///
/// A connection dropped without close_notify ends the body like a clean close; the session
/// records it in [`Session::truncated`].
pub struct Body<'a, C: Channel> {
    channel: Option<&'a mut BufReader<C>>,
    state: &'a mut SessionState,
    truncated: &'a mut bool,
}

fn session_closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "session closed")
}

/// rustls reports a TCP close without close_notify as `UnexpectedEof`.
fn unclean_close(e: &io::Error, truncated: &mut bool) -> bool {
    if e.kind() != io::ErrorKind::UnexpectedEof {
        return false;
    }
    if !*truncated {
        tracing::debug!(error = %e, "body ended without close_notify");
        *truncated = true;
    }
    true
}

impl<C: Channel> Read for Body<'_, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let reader = self.channel.as_deref_mut().ok_or_else(session_closed)?;
        *self.state = SessionState::BodyStreaming;
        match reader.read(buf) {
            Err(e) if unclean_close(&e, self.truncated) => Ok(0),
            other => other,
        }
    }
}

impl<C: Channel> BufRead for Body<'_, C> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        let reader = self.channel.as_deref_mut().ok_or_else(session_closed)?;
        *self.state = SessionState::BodyStreaming;
        match reader.fill_buf() {
            Err(e) if unclean_close(&e, self.truncated) => Ok(&[]),
            other => other,
        }
    }

    fn consume(&mut self, amt: usize) {
        if let Some(reader) = self.channel.as_deref_mut() {
            reader.consume(amt);
        }
    }
}

/// Resolve a `gemini://` URI and run [`Session::connect`] with the URI as the request line.
pub fn fetch(uri: &str, connector: &Connector) -> Result<Session> {
    let target = Target::parse(uri)?;
    Session::connect(&target.host, target.port, &target.request_line, connector)
}
