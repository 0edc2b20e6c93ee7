/*
 * verify.rs
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

//! Server certificate trust policies.
//!
//! Gemini servers mostly present self-signed certificates, so the default policy accepts
//! anything. A policy only decides whether the presented chain is acceptable; handshake
//! signatures are always checked against the crypto provider so the peer must hold the
//! private key of the certificate it sent.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Decides whether a server certificate chain is trusted for a host.
pub trait CertificatePolicy: fmt::Debug + Send + Sync {
    /// Accept (`Ok`) or reject the chain presented by `server_name`.
    fn check(
        &self,
        server_name: &ServerName<'_>,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<(), rustls::Error>;

    /// Called once a handshake that presented `end_entity` has completed, including the
    /// server's proof that it holds the matching private key.
    fn handshake_completed(&self, _server_name: &ServerName<'_>, _end_entity: &CertificateDer<'_>) {}
}

/// Trust every certificate, whatever the chain, issuer, expiry or name.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyCertificate;

impl CertificatePolicy for AcceptAnyCertificate {
    fn check(
        &self,
        _server_name: &ServerName<'_>,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<(), rustls::Error> {
        Ok(())
    }
}

/// Trust on first use: the first certificate seen for a host is pinned (by SHA-256 of the
/// end-entity DER) and later connections must present the same one. The pin is recorded
/// only after a handshake with that certificate completes.
///
/// Pins live in memory only. Callers that want them to persist can read them out with
/// [`PinnedCertificates::pins`] and seed a new store with [`PinnedCertificates::pin`].
#[derive(Debug, Default)]
pub struct PinnedCertificates {
    pins: Mutex<HashMap<String, String>>,
}

impl PinnedCertificates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowercase hex SHA-256 of a DER certificate.
    pub fn fingerprint(cert: &[u8]) -> String {
        let digest = Sha256::digest(cert);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Pin `fingerprint` for `host`, replacing any previous pin.
    pub fn pin(&self, host: &str, fingerprint: impl Into<String>) {
        if let Ok(mut pins) = self.pins.lock() {
            pins.insert(host.to_ascii_lowercase(), fingerprint.into());
        }
    }

    /// Forget the pin for `host` (e.g. after the user accepted a certificate change).
    pub fn forget(&self, host: &str) -> Option<String> {
        self.pins.lock().ok()?.remove(&host.to_ascii_lowercase())
    }

    /// The fingerprint pinned for `host`, if any.
    pub fn pinned(&self, host: &str) -> Option<String> {
        self.pins.lock().ok()?.get(&host.to_ascii_lowercase()).cloned()
    }

    /// Snapshot of all (host, fingerprint) pins.
    pub fn pins(&self) -> Vec<(String, String)> {
        match self.pins.lock() {
            Ok(pins) => pins.iter().map(|(h, f)| (h.clone(), f.clone())).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl CertificatePolicy for PinnedCertificates {
    fn check(
        &self,
        server_name: &ServerName<'_>,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<(), rustls::Error> {
        let host = server_name.to_str().to_ascii_lowercase();
        let seen = Self::fingerprint(end_entity.as_ref());
        let pins = self
            .pins
            .lock()
            .map_err(|_| rustls::Error::General("pin store poisoned".into()))?;
        match pins.get(&host) {
            Some(pinned) if *pinned != seen => {
                tracing::warn!(%host, %pinned, %seen, "certificate does not match pinned fingerprint");
                Err(rustls::Error::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ))
            }
            _ => Ok(()),
        }
    }

    fn handshake_completed(&self, server_name: &ServerName<'_>, end_entity: &CertificateDer<'_>) {
        let host = server_name.to_str().to_ascii_lowercase();
        let seen = Self::fingerprint(end_entity.as_ref());
        if let Ok(mut pins) = self.pins.lock() {
            // A concurrent first connection may have pinned already; the first one wins.
            pins.entry(host).or_insert_with_key(|host| {
                tracing::debug!(%host, fingerprint = %seen, "pinning certificate on first use");
                seen
            });
        }
    }
}

/// Build a root certificate store: platform native certs first, then webpki-roots as fallback.
fn build_root_store() -> RootCertStore {
    let mut root_store = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        tracing::debug!(error = %e, "skipping native certificate source");
    }
    let (added, ignored) = root_store.add_parsable_certificates(native.certs);
    tracing::trace!(added, ignored, "loaded native root certificates");
    if root_store.is_empty() {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    root_store
}

/// Certificate-authority verification for servers that use a public PKI certificate.
#[derive(Debug)]
pub struct WebPkiPolicy {
    inner: Arc<WebPkiServerVerifier>,
}

impl WebPkiPolicy {
    /// Native roots, or Mozilla's bundled roots if the platform has none.
    pub fn new() -> Result<Self> {
        Self::with_roots(build_root_store())
    }

    pub fn with_roots(roots: RootCertStore) -> Result<Self> {
        let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider())
            .build()
            .map_err(|e| Error::ConfigurationFault(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl CertificatePolicy for WebPkiPolicy {
    fn check(
        &self,
        server_name: &ServerName<'_>,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<(), rustls::Error> {
        self.inner
            .verify_server_cert(end_entity, intermediates, server_name, &[], now)
            .map(|_| ())
    }
}

/// The crypto provider used for every connection.
pub(crate) fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Adapts a [`CertificatePolicy`] to rustls' verifier interface.
#[derive(Debug)]
pub(crate) struct PolicyVerifier {
    policy: Arc<dyn CertificatePolicy>,
    provider: Arc<CryptoProvider>,
}

impl PolicyVerifier {
    pub(crate) fn new(policy: Arc<dyn CertificatePolicy>, provider: Arc<CryptoProvider>) -> Self {
        Self { policy, provider }
    }
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        self.policy
            .check(server_name, end_entity, intermediates, now)
            .map(|_| ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
