//! Connection configuration
//!
//! Timeouts, token object labels, the token PIN and the certificate
//! acceptance profile, with presets for common deployments.

use std::time::Duration;

use secrecy::SecretString;

use crate::profile::{CertProfile, LegacyEndpoint};

/// Conventional label of the device certificate object
pub const DEFAULT_CERTIFICATE_LABEL: &str = "Device Cert";
/// Conventional label of the device TLS private key object
pub const DEFAULT_PRIVATE_KEY_LABEL: &str = "Device Priv TLS Key";
/// User PIN of factory-provisioned tokens
pub const DEFAULT_USER_PIN: &str = "0000";

/// Configuration shared by every connection a connector opens
#[derive(Debug)]
pub struct ConnectionConfig {
    /// TCP connect timeout per resolved address
    pub connect_timeout: Duration,
    /// Upper bound on the TLS handshake
    pub handshake_timeout: Duration,
    /// Label of the client certificate object
    pub certificate_label: String,
    /// Label of the client private key object
    pub private_key_label: String,
    /// User PIN; `None` skips login for tokens that need none
    pub user_pin: Option<SecretString>,
    /// Minimum key strength of server certificates
    pub cert_profile: CertProfile,
    /// Endpoints allowed weaker RSA keys (empty unless set explicitly)
    pub legacy_endpoints: Vec<LegacyEndpoint>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(30),
            certificate_label: DEFAULT_CERTIFICATE_LABEL.to_string(),
            private_key_label: DEFAULT_PRIVATE_KEY_LABEL.to_string(),
            user_pin: Some(SecretString::from(DEFAULT_USER_PIN.to_string())),
            cert_profile: CertProfile::default(),
            legacy_endpoints: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    /// Configuration for devices on slow or lossy links
    ///
    /// Token signing on small secure elements can take seconds, so the
    /// handshake gets a generous budget.
    #[must_use]
    pub fn constrained_device() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(120),
            ..Self::default()
        }
    }

    /// Configuration for local development against a nearby endpoint
    #[must_use]
    pub fn development() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Replace the user PIN
    #[must_use]
    pub fn with_user_pin(mut self, pin: impl Into<String>) -> Self {
        self.user_pin = Some(SecretString::from(pin.into()));
        self
    }

    /// Skip token login
    #[must_use]
    pub fn without_login(mut self) -> Self {
        self.user_pin = None;
        self
    }

    /// Use different token object labels
    #[must_use]
    pub fn with_labels(
        mut self,
        certificate_label: impl Into<String>,
        private_key_label: impl Into<String>,
    ) -> Self {
        self.certificate_label = certificate_label.into();
        self.private_key_label = private_key_label.into();
        self
    }

    /// Allow `endpoint` to present weaker RSA keys
    #[must_use]
    pub fn with_legacy_endpoint(mut self, endpoint: LegacyEndpoint) -> Self {
        self.legacy_endpoints.push(endpoint);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_follow_device_conventions() {
        let config = ConnectionConfig::default();
        assert_eq!(config.certificate_label, "Device Cert");
        assert_eq!(config.private_key_label, "Device Priv TLS Key");
        assert_eq!(
            config.user_pin.as_ref().map(|pin| pin.expose_secret().to_string()),
            Some("0000".to_string())
        );
        assert!(config.legacy_endpoints.is_empty());
        assert_eq!(config.cert_profile.rsa_min_bits, 2048);
    }

    #[test]
    fn pin_is_redacted_in_debug_output() {
        let config = ConnectionConfig::default().with_user_pin("982451");
        assert!(!format!("{config:?}").contains("982451"));
    }

    #[test]
    fn presets_keep_labels() {
        let config = ConnectionConfig::constrained_device().without_login();
        assert!(config.handshake_timeout > ConnectionConfig::default().handshake_timeout);
        assert_eq!(config.private_key_label, DEFAULT_PRIVATE_KEY_LABEL);
        assert!(config.user_pin.is_none());
    }
}
