/*
 * lib.rs
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

//! Gemini client core: TLS channel with a pluggable trust policy, request line, bounded
//! status line, and the body stream that follows.
//!
//! ```no_run
//! use std::io::Read;
//! use gemini_core::{Connector, Session};
//!
//! let connector = Connector::default_connector()?;
//! let mut session = Session::connect("geminiprotocol.net", None, "gemini://geminiprotocol.net/", connector)?;
//! println!("{} {}", session.code(), session.meta());
//! let mut body = String::new();
//! session.body().read_to_string(&mut body)?;
//! session.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod uri;
pub mod verify;

pub use config::{SessionConfig, Timeouts};
pub use error::{Error, Result};
pub use net::{effective_port, CancelHandle, Channel, Connector, TlsStream, DEFAULT_PORT};
pub use protocol::gemini::{
    fetch, Body, Session, SessionState, StatusCategory, StatusLine, MAX_STATUS_LINE,
};
pub use uri::Target;
pub use verify::{AcceptAnyCertificate, CertificatePolicy, PinnedCertificates, WebPkiPolicy};
