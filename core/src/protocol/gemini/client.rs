/*
 * client.rs
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

//! Gemini exchange: write the request line, read back exactly one bounded status line.
//! One request per connection; the rest of the stream is the body.

use std::io::{self, BufRead, Write};

use crate::error::{Error, Result};

/// Longest status line accepted, terminator included (2-digit code, space, 1024-byte meta, CRLF).
pub const MAX_STATUS_LINE: usize = 1027;

/// Write the request followed by CRLF and flush, so nothing waits in a buffer while we read.
pub fn write_request<W>(stream: &mut W, request_line: &str) -> Result<()>
where
    W: Write,
{
    tracing::trace!(request = request_line, "sending request");
    stream
        .write_all(request_line.as_bytes())
        .and_then(|_| stream.write_all(b"\r\n"))
        .and_then(|_| stream.flush())
        .map_err(Error::transport("write request"))
}

/// Read up to and including the first LF. Only the bytes of the line are consumed, so
/// anything the reader buffered beyond it stays available as body.
pub fn read_status_line<R>(stream: &mut R) -> Result<Vec<u8>>
where
    R: BufRead,
{
    let mut line = Vec::with_capacity(64);
    loop {
        let available = match stream.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // rustls reports a close without close_notify this way.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(Error::MalformedResponse("connection closed before status line"))
            }
            Err(e) => return Err(Error::transport("read status line")(e)),
        };
        if available.is_empty() {
            return Err(if line.is_empty() {
                Error::MalformedResponse("no status line")
            } else {
                Error::MalformedResponse("status line not terminated")
            });
        }
        let room = MAX_STATUS_LINE - line.len();
        let window = &available[..available.len().min(room)];
        if let Some(pos) = window.iter().position(|&b| b == b'\n') {
            line.extend_from_slice(&window[..=pos]);
            stream.consume(pos + 1);
            return Ok(line);
        }
        let taken = window.len();
        line.extend_from_slice(window);
        stream.consume(taken);
        if line.len() >= MAX_STATUS_LINE {
            return Err(Error::MalformedResponse("status line too long"));
        }
    }
}

/// Send the request and return the raw status line, terminator included.
pub fn exchange<S>(stream: &mut S, request_line: &str) -> Result<Vec<u8>>
where
    S: BufRead + Write,
{
    write_request(stream, request_line)?;
    read_status_line(stream)
}
