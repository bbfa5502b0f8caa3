//! Configuration parsed from environment variables.
//!
//! Backend project credentials are opaque to the shell: they are handed to
//! whichever backend adapter is selected and never interpreted here. The
//! api key never appears in logs.

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// Hosted backend project credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub api_key: String,
    pub auth_domain: String,
    pub project_id: String,
    pub storage_bucket: Option<String>,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
    pub measurement_id: Option<String>,
}

/// The api key is shown only by length.
impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("api_key", &format_args!("<{} chars>", self.api_key.len()))
            .field("auth_domain", &self.auth_domain)
            .field("project_id", &self.project_id)
            .field("storage_bucket", &self.storage_bucket)
            .field("messaging_sender_id", &self.messaging_sender_id)
            .field("app_id", &self.app_id)
            .field("measurement_id", &self.measurement_id)
            .finish()
    }
}

impl BackendConfig {
    /// Required: `BACKEND_API_KEY`, `BACKEND_AUTH_DOMAIN`, `BACKEND_PROJECT_ID`.
    /// Optional: `BACKEND_STORAGE_BUCKET`, `BACKEND_MESSAGING_SENDER_ID`,
    /// `BACKEND_APP_ID`, `BACKEND_MEASUREMENT_ID`.
    ///
    /// Returns `None` when any required value is missing or blank.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Some(Self {
            api_key: get("BACKEND_API_KEY")?,
            auth_domain: get("BACKEND_AUTH_DOMAIN")?,
            project_id: get("BACKEND_PROJECT_ID")?,
            storage_bucket: get("BACKEND_STORAGE_BUCKET"),
            messaging_sender_id: get("BACKEND_MESSAGING_SENDER_ID"),
            app_id: get("BACKEND_APP_ID"),
            measurement_id: get("BACKEND_MEASUREMENT_ID"),
        })
    }
}

/// Process-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub backend: Option<BackendConfig>,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// - `PORT`: listen port, default 3000
    /// - `BACKEND_*`: the hosted project credentials, `None` unless the
    ///   required ones are all set
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is set but not a valid port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidValue { var: "PORT", value: raw })?,
            None => DEFAULT_PORT,
        };
        Ok(Self { port, backend: BackendConfig::from_lookup(&lookup) })
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
