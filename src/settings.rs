use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use thiserror::Error;

/// Errors raised while building or loading settings.
///
/// These represent programmer error (a deployment missing its base URL),
/// not runtime conditions, so they are the one error kind allowed to
/// propagate out of construction.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("api base_url is required")]
    MissingBaseUrl,
    #[error("invalid api base_url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("oauth provider '{0}' is not enabled")]
    ProviderDisabled(String),
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings file: {0}")]
    Parse(#[from] basic_toml::Error),
}

/// How credentials are persisted and attached to requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageStrategy {
    /// Trust HttpOnly cookies until proven broken, then ratchet to tokens
    #[default]
    CookieFirst,
    /// Always persist tokens and send bearer headers
    FallbackOnly,
    /// Detect automatically; same ratchet as `cookie-first`
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct KeeprsSettings {
    pub api: ApiSettings,
    pub session: SessionSettings,
    pub application: ApplicationSettings,
    pub providers: ProvidersSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Host for all requests, e.g. `https://api.example.com`. Required.
    pub base_url: String,
    /// Path prefix prepended to every endpoint path
    pub prefix: String,
    /// Bound on every HTTP request; a hung request fails after this instead
    /// of hanging the dependent engine operation
    pub request_timeout_secs: u64,
    /// Static headers merged into every request
    pub custom_headers: HashMap<String, String>,
    /// Per-operation path overrides merged over the defaults
    pub endpoints: EndpointSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub login: String,
    pub logout: String,
    pub signup: String,
    pub check_session: String,
    pub profile: String,
    pub refresh: String,
    pub password_update: String,
    pub oauth_google: String,
    pub oauth_microsoft: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub storage_strategy: StorageStrategy,
    /// Advisory interval for the external periodic-refresh driver; the
    /// engine never schedules refreshes on its own
    pub token_refresh_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Default `redirect_uri` origin for OAuth sign-in URLs
    pub origin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersSettings {
    pub google: OAuthProviderSettings,
    pub microsoft: OAuthProviderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OAuthProviderSettings {
    pub enabled: bool,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Diagnostic verbosity only; no behavioral effect
    pub debug: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            prefix: "/api/auth".to_string(),
            request_timeout_secs: 30,
            custom_headers: HashMap::new(),
            endpoints: EndpointSettings::default(),
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            login: "/login".to_string(),
            logout: "/logout".to_string(),
            signup: "/signup".to_string(),
            check_session: "/check-auth".to_string(),
            profile: "/user/@me".to_string(),
            refresh: "/token/refresh".to_string(),
            password_update: "/password/update".to_string(),
            oauth_google: "/login/google".to_string(),
            oauth_microsoft: "/login/microsoft".to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            storage_strategy: StorageStrategy::default(),
            token_refresh_interval_secs: None,
        }
    }
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
        }
    }
}

impl ApiSettings {
    /// Build a full request URL from the base URL, prefix and endpoint path.
    #[must_use]
    pub fn url_for(&self, endpoint_path: &str) -> String {
        format!(
            "{}{}{}",
            self.base_url.trim_end_matches('/'),
            self.prefix,
            endpoint_path
        )
    }
}

impl KeeprsSettings {
    /// Start building settings programmatically from the one required
    /// option.
    #[must_use]
    pub fn builder(api_base_url: impl Into<String>) -> SettingsBuilder {
        SettingsBuilder::new(api_base_url)
    }

    /// Load settings from configuration files and environment variables.
    ///
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Keeprs.toml in `KEEPRS_CONFIG_DIR` (if specified and exists)
    /// 3. Keeprs.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// Also initializes logging at the configured level; failure to
    /// initialize the logger (already set by the host) is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A settings file cannot be read or parsed
    /// - The merged settings are missing a valid API base URL
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Self::load_base_settings()?;
        Self::apply_env_overrides(&mut settings);
        settings.init_logging();
        settings.validate()?;
        Ok(settings)
    }

    /// Load base settings from TOML file(s) or use defaults.
    fn load_base_settings() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        let default_config_path = std::path::PathBuf::from("Keeprs.toml");
        if default_config_path.exists() {
            let toml_content = fs::read_to_string(&default_config_path)?;
            settings = basic_toml::from_str(&toml_content)?;
            log::info!("Loaded base settings from {}", default_config_path.display());
        }

        if let Ok(config_dir) = std::env::var("KEEPRS_CONFIG_DIR") {
            let config_path = std::path::Path::new(&config_dir).join("Keeprs.toml");
            if config_path.exists() {
                let toml_content = fs::read_to_string(&config_path)?;
                settings = basic_toml::from_str(&toml_content)?;
                log::info!("Overriding settings from {}", config_path.display());
            } else {
                log::info!(
                    "KEEPRS_CONFIG_DIR set but no Keeprs.toml found at: {}",
                    config_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Apply environment variable overrides to settings.
    pub fn apply_env_overrides(settings: &mut Self) {
        if let Ok(base_url) = std::env::var("KEEPRS_API_BASE_URL") {
            settings.api.base_url = base_url;
        }
        if let Ok(prefix) = std::env::var("KEEPRS_API_PREFIX") {
            settings.api.prefix = prefix;
        }
        if let Ok(timeout) = std::env::var("KEEPRS_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                settings.api.request_timeout_secs = secs;
            }
        }
        if let Ok(strategy) = std::env::var("KEEPRS_STORAGE_STRATEGY") {
            match strategy.as_str() {
                "cookie-first" => {
                    settings.session.storage_strategy = StorageStrategy::CookieFirst;
                }
                "fallback-only" => {
                    settings.session.storage_strategy = StorageStrategy::FallbackOnly;
                }
                "auto" => settings.session.storage_strategy = StorageStrategy::Auto,
                other => log::warn!("Unknown KEEPRS_STORAGE_STRATEGY '{other}', keeping default"),
            }
        }
        if let Ok(interval) = std::env::var("KEEPRS_TOKEN_REFRESH_INTERVAL_SECS") {
            settings.session.token_refresh_interval_secs = interval.parse().ok();
        }
        if let Ok(origin) = std::env::var("KEEPRS_APP_ORIGIN") {
            settings.application.origin = origin;
        }
        if let Ok(client_id) = std::env::var("KEEPRS_GOOGLE_CLIENT_ID") {
            settings.providers.google.enabled = true;
            settings.providers.google.client_id = Some(client_id);
        }
        if let Ok(client_id) = std::env::var("KEEPRS_MICROSOFT_CLIENT_ID") {
            settings.providers.microsoft.enabled = true;
            settings.providers.microsoft.client_id = Some(client_id);
        }
        if let Ok(level) = std::env::var("KEEPRS_LOG_LEVEL") {
            settings.logging.level = level;
        }
        if let Ok(debug) = std::env::var("KEEPRS_DEBUG") {
            settings.logging.debug = debug == "true" || debug == "1";
        }
    }

    /// Validate the merged settings.
    ///
    /// Missing provider client ids are warnings, not errors: the affordance
    /// is simply unusable until configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the API base URL is missing or not an
    /// `http`/`https` URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        let parsed =
            url::Url::parse(&self.api.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
                url: self.api.base_url.clone(),
                reason: e.to_string(),
            })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.api.base_url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        for (name, provider) in [
            ("google", &self.providers.google),
            ("microsoft", &self.providers.microsoft),
        ] {
            if provider.enabled && provider.client_id.is_none() {
                log::warn!("OAuth provider '{name}' is enabled but has no client id configured");
            }
        }

        Ok(())
    }

    fn init_logging(&self) {
        let level = if self.logging.debug {
            "debug"
        } else {
            self.logging.level.as_str()
        };
        let _ = env_logger::Builder::new().parse_filters(level).try_init();
    }
}

/// Fluent builder for programmatic settings construction.
#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    settings: KeeprsSettings,
}

impl SettingsBuilder {
    fn new(api_base_url: impl Into<String>) -> Self {
        let mut settings = KeeprsSettings::default();
        settings.api.base_url = api_base_url.into();
        Self { settings }
    }

    #[must_use]
    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.api.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn storage_strategy(mut self, strategy: StorageStrategy) -> Self {
        self.settings.session.storage_strategy = strategy;
        self
    }

    #[must_use]
    pub fn token_refresh_interval_secs(mut self, secs: u64) -> Self {
        self.settings.session.token_refresh_interval_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.settings.api.request_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn app_origin(mut self, origin: impl Into<String>) -> Self {
        self.settings.application.origin = origin.into();
        self
    }

    #[must_use]
    pub fn custom_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings
            .api
            .custom_headers
            .insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn google(mut self, client_id: impl Into<String>) -> Self {
        self.settings.providers.google = OAuthProviderSettings {
            enabled: true,
            client_id: Some(client_id.into()),
        };
        self
    }

    #[must_use]
    pub fn microsoft(mut self, client_id: impl Into<String>) -> Self {
        self.settings.providers.microsoft = OAuthProviderSettings {
            enabled: true,
            client_id: Some(client_id.into()),
        };
        self
    }

    #[must_use]
    pub fn endpoints(mut self, endpoints: EndpointSettings) -> Self {
        self.settings.api.endpoints = endpoints;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.settings.logging.level = level.into();
        self
    }

    /// Validate and freeze the settings snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the base URL is missing or invalid —
    /// synchronously, before any network activity is possible.
    pub fn build(self) -> Result<KeeprsSettings, ConfigError> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
