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

//! C FFI for the Gemini client core. A session is an opaque pointer returned by
//! gemini_session_open / gemini_session_fetch and released with gemini_session_free.
//! All string parameters are UTF-8 NUL-terminated. Calls block the calling thread.

use libc::{c_char, c_int, c_uint, size_t, ssize_t};
use std::ffi::{CStr, CString};
use std::io::Read;
use std::ptr;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use gemini_core::{
    fetch, AcceptAnyCertificate, CertificatePolicy, Connector, Error, PinnedCertificates,
    Session, SessionConfig, Timeouts, WebPkiPolicy,
};

/// No error.
pub const GEMINI_OK: c_int = 0;
/// Could not connect, handshake failed, or I/O failed.
pub const GEMINI_ERR_TRANSPORT: c_int = -1;
/// The server's status line was missing, too long, or not `<code> <meta>`.
pub const GEMINI_ERR_MALFORMED: c_int = -2;
/// The TLS stack could not be initialised.
pub const GEMINI_ERR_CONFIGURATION: c_int = -3;
/// NULL or non-UTF-8 argument, unusable URI, or unknown mode.
pub const GEMINI_ERR_INVALID_ARGUMENT: c_int = -4;

/// Trust modes for gemini_set_trust_mode.
pub const GEMINI_TRUST_ANY: c_int = 0;
pub const GEMINI_TRUST_PINNED: c_int = 1;
pub const GEMINI_TRUST_WEBPKI: c_int = 2;

/// Opaque session handle.
pub struct GeminiSession {
    inner: Session,
}

/// Process-wide options; sessions opened after a change pick it up.
struct Settings {
    config: SessionConfig,
    connector: Option<Connector>,
}

fn settings() -> &'static RwLock<Settings> {
    static SETTINGS: once_cell::sync::OnceCell<RwLock<Settings>> = once_cell::sync::OnceCell::new();
    SETTINGS.get_or_init(|| {
        RwLock::new(Settings {
            config: SessionConfig::new(),
            connector: None,
        })
    })
}

/// Shared TOFU store used by GEMINI_TRUST_PINNED, so pins survive mode switches.
fn pins() -> &'static Arc<PinnedCertificates> {
    static PINS: once_cell::sync::OnceCell<Arc<PinnedCertificates>> = once_cell::sync::OnceCell::new();
    PINS.get_or_init(|| Arc::new(PinnedCertificates::new()))
}

/// Settings stay consistent across a panic (each update swaps whole values), so a
/// poisoned lock is recovered rather than refused.
fn settings_mut() -> RwLockWriteGuard<'static, Settings> {
    settings().write().unwrap_or_else(|poisoned| {
        tracing::warn!("recovering poisoned gemini settings lock");
        settings().clear_poison();
        PoisonError::into_inner(poisoned)
    })
}

/// Connector for the current settings, built on first use after each change.
fn connector() -> Result<Connector, Error> {
    {
        let s = settings().read().unwrap_or_else(PoisonError::into_inner);
        if let Some(c) = &s.connector {
            return Ok(c.clone());
        }
    }
    let mut s = settings_mut();
    let c = s.config.connector()?;
    s.connector = Some(c.clone());
    Ok(c)
}

fn update_config(f: impl FnOnce(SessionConfig) -> SessionConfig) {
    let mut s = settings_mut();
    let config = std::mem::take(&mut s.config);
    s.config = f(config);
    s.connector = None;
}

fn ptr_to_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string()) }
}

thread_local! {
    static LAST_ERROR: std::cell::RefCell<Option<CString>> = std::cell::RefCell::new(None);
    static LAST_ERROR_KIND: std::cell::Cell<c_int> = std::cell::Cell::new(GEMINI_OK);
}

fn error_kind(err: &Error) -> c_int {
    match err {
        Error::Transport { .. } => GEMINI_ERR_TRANSPORT,
        Error::MalformedResponse(_) => GEMINI_ERR_MALFORMED,
        Error::ConfigurationFault(_) => GEMINI_ERR_CONFIGURATION,
        _ => GEMINI_ERR_INVALID_ARGUMENT,
    }
}

fn set_last_error(kind: c_int, message: &str) {
    let msg = CString::new(message.replace('\0', " ")).unwrap_or_default();
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(msg));
    LAST_ERROR_KIND.with(|k| k.set(kind));
}

fn set_error(err: &Error) -> c_int {
    let kind = error_kind(err);
    tracing::debug!(kind, error = %err, "gemini ffi call failed");
    set_last_error(kind, &err.to_string());
    kind
}

fn invalid_argument(message: &str) -> c_int {
    set_last_error(GEMINI_ERR_INVALID_ARGUMENT, message);
    GEMINI_ERR_INVALID_ARGUMENT
}

fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
    LAST_ERROR_KIND.with(|k| k.set(GEMINI_OK));
}

fn into_handle(result: Result<Session, Error>) -> *mut GeminiSession {
    match result {
        Ok(inner) => {
            clear_last_error();
            Box::into_raw(Box::new(GeminiSession { inner }))
        }
        Err(e) => {
            set_error(&e);
            ptr::null_mut()
        }
    }
}

/// Version string (static, do not free).
#[no_mangle]
pub extern "C" fn gemini_version() -> *const c_char {
    b"0.1.0\0".as_ptr() as *const c_char
}

/// Last error message from a failed call on this thread. Valid until the next FFI call. Do not free.
#[no_mangle]
pub extern "C" fn gemini_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(ptr::null())
    })
}

/// GEMINI_ERR_* kind of the last failed call on this thread, or GEMINI_OK.
#[no_mangle]
pub extern "C" fn gemini_last_error_kind() -> c_int {
    LAST_ERROR_KIND.with(|k| k.get())
}

/// Free a string returned by gemini_session_meta. No-op if ptr is NULL.
#[no_mangle]
pub unsafe extern "C" fn gemini_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------- Settings ----------

/// Deadlines in milliseconds for sessions opened from now on. 0 = wait indefinitely.
#[no_mangle]
pub extern "C" fn gemini_set_timeouts(connect_ms: c_uint, read_ms: c_uint, write_ms: c_uint) {
    let ms = |v: c_uint| (v > 0).then(|| Duration::from_millis(u64::from(v)));
    let timeouts = Timeouts {
        connect: ms(connect_ms),
        read: ms(read_ms),
        write: ms(write_ms),
    };
    update_config(|config| config.with_timeouts(timeouts));
}

/// Certificate trust for sessions opened from now on: GEMINI_TRUST_ANY, GEMINI_TRUST_PINNED
/// (trust on first use, pins kept for the life of the process) or GEMINI_TRUST_WEBPKI.
/// Returns GEMINI_OK or a GEMINI_ERR_* code.
#[no_mangle]
pub extern "C" fn gemini_set_trust_mode(mode: c_int) -> c_int {
    let policy: Arc<dyn CertificatePolicy> = match mode {
        GEMINI_TRUST_ANY => Arc::new(AcceptAnyCertificate),
        GEMINI_TRUST_PINNED => pins().clone(),
        GEMINI_TRUST_WEBPKI => match WebPkiPolicy::new() {
            Ok(p) => Arc::new(p),
            Err(e) => return set_error(&e),
        },
        _ => return invalid_argument("unknown trust mode"),
    };
    update_config(|config| config.with_policy(policy));
    clear_last_error();
    GEMINI_OK
}

// ---------- Session ----------

/// Connect to host:port (port < 0 means the default, 1965), send request, read the status line.
/// Returns a session (free with gemini_session_free) or NULL; see gemini_last_error.
#[no_mangle]
pub unsafe extern "C" fn gemini_session_open(
    host: *const c_char,
    port: c_int,
    request: *const c_char,
) -> *mut GeminiSession {
    let (Some(host), Some(request)) = (ptr_to_str(host), ptr_to_str(request)) else {
        invalid_argument("host and request must be non-NULL UTF-8");
        return ptr::null_mut();
    };
    let port = if port < 0 {
        None
    } else {
        match u16::try_from(port) {
            Ok(p) => Some(p),
            Err(_) => {
                invalid_argument("port out of range");
                return ptr::null_mut();
            }
        }
    };
    into_handle(connector().and_then(|c| Session::connect(&host, port, &request, &c)))
}

/// Resolve an absolute URI (gemini://host[:port]/...) and open a session with it as the request.
#[no_mangle]
pub unsafe extern "C" fn gemini_session_fetch(uri: *const c_char) -> *mut GeminiSession {
    let Some(uri) = ptr_to_str(uri) else {
        invalid_argument("uri must be non-NULL UTF-8");
        return ptr::null_mut();
    };
    into_handle(connector().and_then(|c| fetch(&uri, &c)))
}

/// Status code, or GEMINI_ERR_INVALID_ARGUMENT if session is NULL.
#[no_mangle]
pub unsafe extern "C" fn gemini_session_code(session: *const GeminiSession) -> c_int {
    match session.as_ref() {
        Some(s) => c_int::try_from(s.inner.code()).unwrap_or(c_int::MAX),
        None => invalid_argument("session is NULL"),
    }
}

/// Status meta as a new string (caller frees with gemini_free_string), or NULL.
#[no_mangle]
pub unsafe extern "C" fn gemini_session_meta(session: *const GeminiSession) -> *mut c_char {
    let Some(s) = session.as_ref() else {
        invalid_argument("session is NULL");
        return ptr::null_mut();
    };
    match CString::new(s.inner.meta()) {
        Ok(c) => c.into_raw(),
        Err(_) => {
            invalid_argument("meta contains NUL");
            ptr::null_mut()
        }
    }
}

/// Read up to len body bytes into buf. Returns bytes read, 0 at end of body, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn gemini_session_read(
    session: *mut GeminiSession,
    buf: *mut u8,
    len: size_t,
) -> ssize_t {
    let Some(s) = session.as_mut() else {
        invalid_argument("session is NULL");
        return -1;
    };
    if buf.is_null() {
        invalid_argument("buf is NULL");
        return -1;
    }
    let out = std::slice::from_raw_parts_mut(buf, len);
    match s.inner.body().read(out) {
        Ok(n) => n as ssize_t,
        Err(e) => {
            set_error(&Error::transport("read body")(e));
            -1
        }
    }
}

/// 1 if the body ended with the connection dropping instead of a TLS close_notify, 0 if not
/// (or not yet at the end), GEMINI_ERR_INVALID_ARGUMENT if session is NULL.
#[no_mangle]
pub unsafe extern "C" fn gemini_session_truncated(session: *const GeminiSession) -> c_int {
    match session.as_ref() {
        Some(s) => c_int::from(s.inner.truncated()),
        None => invalid_argument("session is NULL"),
    }
}

/// Close the session's connection. Safe to call more than once. Returns GEMINI_OK or an error code.
#[no_mangle]
pub unsafe extern "C" fn gemini_session_close(session: *mut GeminiSession) -> c_int {
    let Some(s) = session.as_mut() else {
        return invalid_argument("session is NULL");
    };
    match s.inner.close() {
        Ok(()) => GEMINI_OK,
        Err(e) => set_error(&e),
    }
}

/// Close (if still open) and free a session. No-op if session is NULL.
#[no_mangle]
pub unsafe extern "C" fn gemini_session_free(session: *mut GeminiSession) {
    if !session.is_null() {
        let _ = Box::from_raw(session);
    }
}
