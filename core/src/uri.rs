/*
 * uri.rs
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

//! Request targets: split an absolute URI (gemini://host:port/path?query) into the host and
//! port to connect to and the request line to send. No normalization: the request line is the
//! URI exactly as given.

use crate::error::{Error, Result};

/// Where to connect and what to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host as written in the URI; IPv6 literals keep their brackets.
    pub host: String,
    /// `None` when the URI has no port (the default port applies).
    pub port: Option<u16>,
    pub request_line: String,
}

impl Target {
    pub fn new(host: impl Into<String>, port: Option<u16>, request_line: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            request_line: request_line.into(),
        }
    }

    /// Parse an absolute URI with an authority. Any scheme is accepted; the server decides
    /// whether it proxies non-gemini requests.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |why: &str| Error::InvalidTarget(format!("{}: {}", why, uri));

        let (scheme, rest) = uri.split_once("://").ok_or_else(|| invalid("no scheme"))?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(invalid("bad scheme"));
        }

        let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        // Userinfo is not meaningful for Gemini; drop it.
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);

        let (host, port) = if host_port.starts_with('[') {
            let close = host_port.find(']').ok_or_else(|| invalid("unclosed IPv6 literal"))?;
            let host = &host_port[..=close];
            match &host_port[close + 1..] {
                "" => (host, None),
                p => (host, Some(p.strip_prefix(':').ok_or_else(|| invalid("bad port"))?)),
            }
        } else {
            match host_port.rsplit_once(':') {
                Some((h, p)) => (h, Some(p)),
                None => (host_port, None),
            }
        };
        if host.is_empty() || host == "[]" {
            return Err(invalid("no host"));
        }

        let port = match port {
            None | Some("") => None,
            Some(p) => Some(p.parse::<u16>().map_err(|_| invalid("bad port"))?),
        };

        Ok(Self::new(host, port, uri))
    }
}
