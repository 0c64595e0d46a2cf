//! Authorization configuration.
//!
//! Values are supplied by the embedding application at construction time;
//! nothing here is read from globals.

use chrono::Duration;
use std::time::Duration as StdDuration;
use thiserror::Error;

/// Default timeout of a hidden-frame handshake.
pub const DEFAULT_LOADER_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Errors from loading configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    /// A value is present but unusable.
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// OpenID Connect client configuration for one identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcConfig {
    /// Issuer base URL (e.g., "https://tunnistus.hel.fi/auth/realms/helsinki-tunnistus").
    pub authority: String,

    /// OAuth client identifier.
    pub client_id: String,

    /// Where the provider sends the browser back with `code` and `state`.
    pub redirect_uri: String,

    /// Path of the authorize endpoint, appended to `authority`.
    ///
    /// Default: `/protocol/openid-connect/auth`
    pub authorization_path: String,

    /// How long a pending redirect entry stays valid.
    ///
    /// Default: 10 minutes
    pub pending_state_ttl: Duration,
}

impl OidcConfig {
    /// Create configuration for one provider.
    ///
    /// # Arguments
    ///
    /// * `authority` - Issuer base URL
    /// * `client_id` - OAuth client identifier
    /// * `redirect_uri` - Registered redirect URI of this application
    #[must_use]
    pub fn new(
        authority: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            authority: authority.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            authorization_path: "/protocol/openid-connect/auth".to_string(),
            pending_state_ttl: Duration::minutes(10),
        }
    }

    /// Load configuration from `PROFILE_OIDC_AUTHORITY`,
    /// `PROFILE_OIDC_CLIENT_ID` and `PROFILE_OIDC_REDIRECT_URI`.
    ///
    /// `PROFILE_OIDC_AUTHORIZATION_PATH` optionally overrides the endpoint path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvVarNotSet`] if a required variable is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix("PROFILE_OIDC")
    }

    /// Like [`OidcConfig::from_env`] with a custom variable prefix, for
    /// applications talking to more than one provider.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvVarNotSet`] if a required variable is missing.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            let key = format!("{prefix}_{name}");
            std::env::var(&key).map_err(|_| ConfigError::EnvVarNotSet(key))
        };

        let mut config = Self::new(var("AUTHORITY")?, var("CLIENT_ID")?, var("REDIRECT_URI")?);
        if let Ok(path) = var("AUTHORIZATION_PATH") {
            config.authorization_path = path;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the authorize endpoint path.
    #[must_use]
    pub fn with_authorization_path(mut self, path: impl Into<String>) -> Self {
        self.authorization_path = path.into();
        self
    }

    /// Set how long pending redirect entries stay valid.
    #[must_use]
    pub const fn with_pending_state_ttl(mut self, ttl: Duration) -> Self {
        self.pending_state_ttl = ttl;
        self
    }

    /// Full authorize endpoint URL.
    #[must_use]
    pub fn authorization_endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.authority.trim_end_matches('/'),
            self.authorization_path.trim_start_matches('/')
        )
    }

    /// Check that the URLs parse and the client id is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "client_id",
                reason: "must not be empty".to_string(),
            });
        }
        url::Url::parse(&self.authorization_endpoint()).map_err(|e| ConfigError::Invalid {
            field: "authority",
            reason: e.to_string(),
        })?;
        url::Url::parse(&self.redirect_uri).map_err(|e| ConfigError::Invalid {
            field: "redirect_uri",
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self::new(
            "http://localhost:8080/auth/realms/helsinki-tunnistus",
            "profile-ui",
            "http://localhost:3000/callback",
        )
    }
}

/// Hidden-frame loader configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLoaderConfig {
    /// How long to wait for an accepted message.
    ///
    /// Default: 10 seconds
    pub timeout: StdDuration,
}

impl FrameLoaderConfig {
    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for FrameLoaderConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOADER_TIMEOUT,
        }
    }
}
