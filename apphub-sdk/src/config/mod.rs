use apphub_core::config as core_config;
use apphub_core::error::AppError;
use secrecy::SecretString;
use serde::Deserialize;
use std::env;
use validator::Validate;

/// Settings for a host binary embedding the SDK.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub sdk: SdkConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// Everything the SDK needs to trust the hub.
///
/// Supplied by the embedding application; the SDK never persists it.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SdkConfig {
    /// Base URL of the hub, e.g. `https://hub.example.com`.
    #[validate(url)]
    pub hub_url: String,
    #[validate(length(min = 1))]
    pub client_id: String,
    pub client_secret: SecretString,
    /// This application's identifier; used as the token audience, the
    /// `licensed_apps` entry and the key into the `scopes` claim.
    #[validate(length(min = 1))]
    pub app_slug: String,
    /// RS256 public key (PEM). When set it wins over the hub's JWKS.
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    #[validate(url)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<SecretString>,
    #[serde(default = "default_use_discovery")]
    pub use_discovery: bool,
    #[serde(default)]
    pub clock_skew_seconds: u64,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_jwks_refresh_cooldown_seconds")]
    pub jwks_refresh_cooldown_seconds: u64,
    /// Permits `VerifyOptions::trusted_internal()`. Off unless a deployment
    /// explicitly has internal callers presenting audience-less or
    /// unlicensed tokens.
    #[serde(default)]
    pub allow_verification_relaxations: bool,
    #[serde(default)]
    pub webhook_tolerance_seconds: Option<u64>,
}

fn default_use_discovery() -> bool {
    true
}

fn default_http_timeout_seconds() -> u64 {
    10
}

fn default_jwks_refresh_cooldown_seconds() -> u64 {
    30
}

impl SdkConfig {
    pub fn new(
        hub_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        app_slug: impl Into<String>,
    ) -> Self {
        Self {
            hub_url: hub_url.into(),
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret.into()),
            app_slug: app_slug.into(),
            public_key: None,
            redirect_uri: None,
            webhook_secret: None,
            use_discovery: default_use_discovery(),
            clock_skew_seconds: 0,
            http_timeout_seconds: default_http_timeout_seconds(),
            jwks_refresh_cooldown_seconds: default_jwks_refresh_cooldown_seconds(),
            allow_verification_relaxations: false,
            webhook_tolerance_seconds: None,
        }
    }

    pub fn with_public_key(mut self, pem: impl Into<String>) -> Self {
        self.public_key = Some(pem.into());
        self
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(SecretString::new(secret.into()));
        self
    }

    pub fn with_discovery(mut self, enabled: bool) -> Self {
        self.use_discovery = enabled;
        self
    }

    pub fn with_verification_relaxations(mut self, allowed: bool) -> Self {
        self.allow_verification_relaxations = allowed;
        self
    }

    /// Hub base URL without a trailing slash.
    pub fn hub_base(&self) -> &str {
        self.hub_url.trim_end_matches('/')
    }

    /// Read `APPHUB_*` variables. A `.env` file is honoured.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let is_prod = is_prod()?;

        let public_key = match get_optional_env("APPHUB_PUBLIC_KEY") {
            Some(pem) => Some(pem),
            None => match get_optional_env("APPHUB_PUBLIC_KEY_PATH") {
                Some(path) => Some(std::fs::read_to_string(&path).map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "Failed to read public key from {}: {}",
                        path,
                        e
                    ))
                })?),
                None => None,
            },
        };

        let config = SdkConfig {
            hub_url: get_env("APPHUB_URL", None, is_prod)?,
            client_id: get_env("APPHUB_CLIENT_ID", None, is_prod)?,
            client_secret: SecretString::new(get_env("APPHUB_CLIENT_SECRET", None, is_prod)?),
            app_slug: get_env("APPHUB_APP_SLUG", None, is_prod)?,
            public_key,
            redirect_uri: get_optional_env("APPHUB_REDIRECT_URI"),
            webhook_secret: get_optional_env("APPHUB_WEBHOOK_SECRET").map(SecretString::new),
            use_discovery: parse_env("APPHUB_USE_DISCOVERY", "true", is_prod)?,
            clock_skew_seconds: parse_env("APPHUB_CLOCK_SKEW_SECONDS", "0", is_prod)?,
            http_timeout_seconds: parse_env("APPHUB_HTTP_TIMEOUT_SECONDS", "10", is_prod)?,
            jwks_refresh_cooldown_seconds: parse_env(
                "APPHUB_JWKS_REFRESH_COOLDOWN_SECONDS",
                "30",
                is_prod,
            )?,
            allow_verification_relaxations: parse_env(
                "APPHUB_ALLOW_VERIFICATION_RELAXATIONS",
                "false",
                is_prod,
            )?,
            webhook_tolerance_seconds: match get_optional_env("APPHUB_WEBHOOK_TOLERANCE_SECONDS")
            {
                Some(raw) => Some(raw.parse().map_err(|e: std::num::ParseIntError| {
                    AppError::ConfigError(anyhow::anyhow!(
                        "APPHUB_WEBHOOK_TOLERANCE_SECONDS: {}",
                        e
                    ))
                })?),
                None => None,
            },
        };

        config.validate()?;
        Ok(config)
    }
}

impl HostConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        let config = HostConfig {
            common,
            environment,
            service_name: get_env("SERVICE_NAME", Some("apphub-sdk"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            sdk: SdkConfig::from_env()?,
        };

        if config.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if is_prod && config.sdk.allow_verification_relaxations {
            tracing::warn!("Token verification relaxations are enabled in production");
        }

        Ok(config)
    }
}

fn is_prod() -> Result<bool, AppError> {
    let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
    let environment: Environment = env_str
        .parse()
        .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
    Ok(environment == Environment::Prod)
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod && default.is_none() {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_new_applies_defaults() {
        let config = SdkConfig::new("https://hub.example.com/", "client", "secret", "fleet");

        assert!(config.use_discovery);
        assert_eq!(config.clock_skew_seconds, 0);
        assert_eq!(config.http_timeout_seconds, 10);
        assert!(!config.allow_verification_relaxations);
        assert_eq!(config.hub_base(), "https://hub.example.com");
        assert_eq!(config.client_secret.expose_secret(), "secret");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_url_and_empty_slug() {
        let config = SdkConfig::new("not a url", "client", "secret", "");
        let errors = config.validate().unwrap_err();
        let fields = errors.field_errors();

        assert!(fields.contains_key("hub_url"));
        assert!(fields.contains_key("app_slug"));
    }

    #[test]
    fn test_secrets_are_redacted_in_debug_output() {
        let config = SdkConfig::new("https://hub.example.com", "client", "s3cr3t", "fleet")
            .with_webhook_secret("whsec_live");
        let debug = format!("{:?}", config);

        assert!(!debug.contains("s3cr3t"));
        assert!(!debug.contains("whsec_live"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: SdkConfig = serde_json::from_value(serde_json::json!({
            "hub_url": "https://hub.example.com",
            "client_id": "client",
            "client_secret": "secret",
            "app_slug": "fleet"
        }))
        .unwrap();

        assert!(config.use_discovery);
        assert_eq!(config.jwks_refresh_cooldown_seconds, 30);
        assert!(config.webhook_tolerance_seconds.is_none());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert!("staging".parse::<Environment>().is_err());
    }
}
