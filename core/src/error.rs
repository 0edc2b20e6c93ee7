/*
 * error.rs
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

//! Errors from channel establishment, the request/response exchange, and TLS setup.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Gemini client error.
///
/// Only three kinds reach callers of a session: the transport failed, the server sent
/// something that is not a status line, or the TLS stack could not be configured at all.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Connect, handshake, or I/O failure while writing the request or reading the status line.
    #[error("transport: {context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The status line is missing, too long, or does not follow `<code> <meta>`.
    /// The reason is for diagnostics only.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    /// The security subsystem could not be initialised. Not a per-request condition.
    #[error("TLS configuration fault: {0}")]
    ConfigurationFault(String),

    /// A URI handed to the target resolver has no usable host or port.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

impl Error {
    /// Wrap an I/O error with a short description of what was being attempted.
    pub fn transport(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::Transport { context, source }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MalformedResponse(_))
    }

    pub fn is_configuration_fault(&self) -> bool {
        matches!(self, Error::ConfigurationFault(_))
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::ConfigurationFault(e.to_string())
    }
}
