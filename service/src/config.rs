use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default OAuth provider used when `OAUTH_PROVIDER` is not set.
pub const DEFAULT_OAUTH_PROVIDER: &str = "google";

/// Default location of the PKCE parameter store.
pub const DEFAULT_PKCE_STORE_PATH: &str = ".pkce_flow/pkce";

/// Largest PKCE TTL a millisecond-precision signed duration can hold.
pub const MAX_PKCE_TTL_SECONDS: u64 = i64::MAX as u64 / 1000;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl fmt::Display for RustEnvParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected one of development, production, staging")
    }
}

impl std::error::Error for RustEnvParseError {}

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The OAuth provider to drive (e.g. google). Unknown names need explicit endpoint URLs.
    #[arg(long, env, default_value = DEFAULT_OAUTH_PROVIDER)]
    pub oauth_provider: String,

    /// The public OAuth client ID registered with the provider.
    #[arg(long, env)]
    oauth_client_id: Option<String>,

    /// The redirect URI registered with the provider.
    #[arg(long, env, default_value = "http://localhost:8080/auth/callback")]
    pub oauth_redirect_uri: String,

    /// Overrides the provider's authorization endpoint.
    #[arg(long, env)]
    oauth_authorization_url: Option<String>,

    /// Overrides the provider's token endpoint.
    #[arg(long, env)]
    oauth_token_url: Option<String>,

    /// Secondary token endpoint tried after the primary one fails (e.g. a backend proxy).
    #[arg(long, env)]
    oauth_fallback_token_url: Option<String>,

    /// Comma separated scopes. Empty keeps the provider preset's scopes.
    #[arg(long, env, value_delimiter = ',')]
    pub oauth_scopes: Vec<String>,

    /// API key sent to token endpoints that sit behind a gateway.
    #[arg(long, env)]
    token_api_key: Option<String>,

    /// Header carrying `token_api_key`.
    #[arg(long, env, default_value = "X-Api-Key")]
    pub token_api_key_header: String,

    /// Seconds a generated PKCE parameter set stays valid.
    #[arg(
        long,
        env,
        default_value_t = 600,
        value_parser = clap::value_parser!(u64).range(1..=MAX_PKCE_TTL_SECONDS),
    )]
    pub pkce_ttl_seconds: u64,

    /// Directory holding in-flight PKCE parameters between the two legs of a flow.
    #[arg(long, env, default_value = DEFAULT_PKCE_STORE_PATH)]
    pub pkce_store_path: String,

    /// Hex encoded AES-256 key (64 chars) used to encrypt the PKCE store at rest.
    #[arg(long, env)]
    pkce_store_key: Option<String>,

    /// Timeout in seconds for each token endpoint request
    #[arg(long, env, default_value_t = 30)]
    pub http_timeout_seconds: u64,

    /// Record raw secret values in diagnostic timelines. Debug builds only; refused in production.
    #[arg(long, env, default_value_t = false)]
    diagnostics_capture_raw: bool,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .try_map(|s| s.parse::<LevelFilter>().map_err(|e| e.to_string())),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .try_map(|s| s.parse::<RustEnv>()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn oauth_client_id(&self) -> Option<String> {
        self.oauth_client_id.clone()
    }

    pub fn oauth_authorization_url(&self) -> Option<String> {
        self.oauth_authorization_url.clone()
    }

    pub fn oauth_token_url(&self) -> Option<String> {
        self.oauth_token_url.clone()
    }

    pub fn oauth_fallback_token_url(&self) -> Option<String> {
        self.oauth_fallback_token_url.clone()
    }

    /// Returns the token endpoint API key, if configured.
    pub fn token_api_key(&self) -> Option<String> {
        self.token_api_key.clone()
    }

    /// Returns the PKCE store encryption key, if configured.
    pub fn pkce_store_key(&self) -> Option<String> {
        self.pkce_store_key.clone()
    }

    pub fn pkce_ttl(&self) -> Duration {
        Duration::from_secs(self.pkce_ttl_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Whether raw secrets may be captured. Always false in production.
    pub fn diagnostics_capture_raw(&self) -> bool {
        self.diagnostics_capture_raw && !self.is_production()
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "OAUTH_PROVIDER",
        "OAUTH_CLIENT_ID",
        "OAUTH_SCOPES",
        "PKCE_TTL_SECONDS",
        "DIAGNOSTICS_CAPTURE_RAW",
        "RUNTIME_ENV",
        "LOG_LEVEL_FILTER",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::try_parse_from(["pkce_flow"]).unwrap();

        assert_eq!(config.oauth_provider, "google");
        assert_eq!(config.oauth_client_id(), None);
        assert!(config.oauth_scopes.is_empty());
        assert_eq!(config.pkce_ttl(), Duration::from_secs(600));
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert_eq!(config.log_level_filter, LevelFilter::Info);
        assert_eq!(config.runtime_env(), RustEnv::Development);
        assert_eq!(config.pkce_store_path, DEFAULT_PKCE_STORE_PATH);
    }

    #[test]
    #[serial]
    fn test_values_from_env() {
        clear_env();
        env::set_var("OAUTH_CLIENT_ID", "client-from-env");
        env::set_var("OAUTH_SCOPES", "openid,email");
        env::set_var("PKCE_TTL_SECONDS", "120");
        env::set_var("LOG_LEVEL_FILTER", "DEBUG");

        let config = Config::try_parse_from(["pkce_flow"]).unwrap();
        clear_env();

        assert_eq!(config.oauth_client_id().as_deref(), Some("client-from-env"));
        assert_eq!(config.oauth_scopes, vec!["openid", "email"]);
        assert_eq!(config.pkce_ttl(), Duration::from_secs(120));
        assert_eq!(config.log_level_filter, LevelFilter::Debug);
    }

    #[test]
    #[serial]
    fn test_raw_capture_refused_in_production() {
        clear_env();
        let config = Config::try_parse_from([
            "pkce_flow",
            "--diagnostics-capture-raw",
            "--runtime-env",
            "production",
        ])
        .unwrap();

        assert!(config.is_production());
        assert!(!config.diagnostics_capture_raw());
    }

    #[test]
    #[serial]
    fn test_raw_capture_allowed_in_development() {
        clear_env();
        let config =
            Config::try_parse_from(["pkce_flow", "--diagnostics-capture-raw"]).unwrap();
        assert!(config.diagnostics_capture_raw());
    }

    #[test]
    #[serial]
    fn test_invalid_runtime_env_is_rejected() {
        clear_env();
        assert!(Config::try_parse_from(["pkce_flow", "--runtime-env", "qa"]).is_err());
    }

    #[test]
    #[serial]
    fn test_pkce_ttl_bounds() {
        clear_env();
        let max = MAX_PKCE_TTL_SECONDS.to_string();
        let config =
            Config::try_parse_from(["pkce_flow", "--pkce-ttl-seconds", max.as_str()]).unwrap();
        assert_eq!(config.pkce_ttl(), Duration::from_secs(MAX_PKCE_TTL_SECONDS));

        let too_large = (MAX_PKCE_TTL_SECONDS + 1).to_string();
        assert!(
            Config::try_parse_from(["pkce_flow", "--pkce-ttl-seconds", too_large.as_str()])
                .is_err()
        );
        assert!(Config::try_parse_from(["pkce_flow", "--pkce-ttl-seconds", "0"]).is_err());
        assert!(
            Config::try_parse_from(["pkce_flow", "--pkce-ttl-seconds", "18446744073709551615"])
                .is_err()
        );
    }

    #[test]
    fn test_rust_env_round_trip_display() {
        assert_eq!("Staging".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!(RustEnv::Production.to_string(), "production");
        assert_eq!("qa".parse::<RustEnv>(), Err(RustEnvParseError));
    }
}
