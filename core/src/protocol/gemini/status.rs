/*
 * status.rs
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

//! Gemini status line: `<code> <meta>` terminated by CRLF.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Parsed status line. The code is opaque to this crate beyond being an integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u32,
    pub meta: String,
}

/// Response family, from the first digit of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    Input,
    Success,
    Redirect,
    TemporaryFailure,
    PermanentFailure,
    ClientCertificateRequired,
    Unknown,
}

impl StatusLine {
    pub fn category(&self) -> StatusCategory {
        match self.code {
            10..=19 => StatusCategory::Input,
            20..=29 => StatusCategory::Success,
            30..=39 => StatusCategory::Redirect,
            40..=49 => StatusCategory::TemporaryFailure,
            50..=59 => StatusCategory::PermanentFailure,
            60..=69 => StatusCategory::ClientCertificateRequired,
            _ => StatusCategory::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        self.category() == StatusCategory::Success
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.meta)
    }
}

/// Strip one trailing line terminator (CRLF or bare LF).
fn strip_terminator(line: &str) -> &str {
    line.strip_suffix("\r\n")
        .or_else(|| line.strip_suffix('\n'))
        .unwrap_or(line)
}

/// Parse one status line. The terminator, if present, is removed before the meta is taken.
pub fn parse_status(line: &str) -> Result<StatusLine> {
    let line = strip_terminator(line);
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(Error::MalformedResponse("status code is not a number"));
    }
    let code: u32 = line[..digits]
        .parse()
        .map_err(|_| Error::MalformedResponse("status code out of range"))?;
    let meta = line[digits..]
        .strip_prefix(' ')
        .ok_or(Error::MalformedResponse("status code not followed by a space"))?;
    Ok(StatusLine {
        code,
        meta: meta.to_string(),
    })
}

/// Parse the raw bytes read off the wire, rejecting non-UTF-8 input.
pub fn parse_status_bytes(raw: &[u8]) -> Result<StatusLine> {
    let line = std::str::from_utf8(raw)
        .map_err(|_| Error::MalformedResponse("status line is not UTF-8"))?;
    parse_status(line)
}

impl FromStr for StatusLine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_status(s)
    }
}
