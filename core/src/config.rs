/*
 * config.rs
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

//! Session configuration: trust policy and optional deadlines.
//! Nothing here is read from the environment or from disk; the embedding application decides.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::ClientConfig;

use crate::error::Result;
use crate::net::Connector;
use crate::verify::{provider, AcceptAnyCertificate, CertificatePolicy, PolicyVerifier};

/// Deadlines applied to the TCP socket. `None` means block indefinitely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub write: Option<Duration>,
}

/// Options for opening Gemini sessions. Build a [`Connector`] once and reuse it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    policy: Arc<dyn CertificatePolicy>,
    timeouts: Timeouts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: Arc::new(AcceptAnyCertificate),
            timeouts: Timeouts::default(),
        }
    }
}

impl SessionConfig {
    /// Accept-any trust policy, no deadlines.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: Arc<dyn CertificatePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.read = Some(timeout);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.write = Some(timeout);
        self
    }

    /// Replace all three deadlines at once.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn policy(&self) -> &Arc<dyn CertificatePolicy> {
        &self.policy
    }

    /// TLS client config for Gemini: ring provider, safe protocol versions, SNI on,
    /// server certificates judged by the configured policy, no client certificate.
    pub fn tls_client_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = provider();
        let verifier = Arc::new(PolicyVerifier::new(self.policy.clone(), provider.clone()));
        let mut config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth();
        config.enable_sni = true;
        Ok(Arc::new(config))
    }

    /// Build the TLS stack. Fails only with `ConfigurationFault`.
    pub fn connector(&self) -> Result<Connector> {
        Ok(Connector::new(
            self.tls_client_config()?,
            self.policy.clone(),
            self.timeouts,
        ))
    }
}
