//! Developer probe that drives both legs of an authorization code flow from a terminal.
//!
//! Run once without `--callback-url` to print the authorization URL, open it in a
//! browser, then run again with the URL the provider redirected to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use log::{error, info, warn};
use pkce_auth::api_key::{ApiKeyAuth, RequestAuth};
use pkce_auth::diagnostics::Recorder;
use pkce_auth::error::{oauth_error, OAuthErrorKind};
use pkce_auth::http::HttpClientBuilder;
use pkce_auth::oauth::exchange::ExchangeChain;
use pkce_auth::oauth::providers::google;
use pkce_auth::oauth::token::SessionStore;
use pkce_auth::oauth::{CallbackParams, Orchestrator, ProviderConfig};
use pkce_auth::store::FileStore;
use pkce_auth::Error;
use secrecy::{ExposeSecret, SecretString};
use service::{config::Config, logging::Logger};

#[derive(Parser)]
#[command(name = "pkce_flow")]
#[command(about = "Drive an OAuth 2.0 authorization code + PKCE flow for troubleshooting")]
struct Cli {
    #[command(flatten)]
    config: Config,

    /// Redirect URL received from the provider; completes a previously initiated flow
    #[arg(long)]
    callback_url: Option<String>,

    /// Drop the in-flight attempt for the provider instead of starting one
    #[arg(long, conflicts_with = "callback_url")]
    abandon: bool,

    /// Write the diagnostic timeline of this run as JSON
    #[arg(long)]
    export_diagnostics: Option<PathBuf>,
}

/// Accepts issued tokens without keeping them; only their shape is logged.
struct LoggingSessionStore;

#[async_trait]
impl SessionStore for LoggingSessionStore {
    async fn create_session(
        &self,
        access_token: &SecretString,
        refresh_token: Option<&SecretString>,
    ) -> Result<(), Error> {
        info!(
            "Session created: access_token length={}, refresh_token present={}",
            access_token.expose_secret().len(),
            refresh_token.is_some()
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    Logger::init_logger(&cli.config);

    let recorder = Arc::new(Recorder::new().with_raw_capture(cli.config.diagnostics_capture_raw()));
    if recorder.captures_raw() {
        warn!("Raw secret capture is enabled; diagnostic exports will contain credentials");
    }

    let result = run(&cli, recorder.clone()).await;

    if let Some(path) = &cli.export_diagnostics {
        export_diagnostics(&recorder, path);
    }

    if let Err(e) = result {
        error!("OAuth probe failed ({:?}): {}", e.outcome(), e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, recorder: Arc<Recorder>) -> Result<(), Error> {
    let config = &cli.config;
    let provider = provider_config(config)?;
    let name = provider.name.clone();

    let client = HttpClientBuilder::new()
        .with_timeout(config.http_timeout())
        .build()?;
    let auth = config.token_api_key().map(|key| {
        Arc::new(ApiKeyAuth::new(
            &config.token_api_key_header,
            SecretString::new(key),
            "",
        )) as Arc<dyn RequestAuth>
    });
    let chain = ExchangeChain::standard(client, &provider, auth);
    info!(
        "Using {} with exchange strategies {:?}",
        name,
        chain.strategy_names()
    );

    let mut store = FileStore::new(&config.pkce_store_path);
    if let Some(key) = config.pkce_store_key() {
        store = store.with_encryption_key(key);
    }

    let ttl = chrono::Duration::from_std(config.pkce_ttl()).map_err(|_| {
        oauth_error(
            OAuthErrorKind::InvalidProviderConfig,
            "PKCE_TTL_SECONDS is out of range",
        )
    })?;

    let orchestrator = Orchestrator::builder(Arc::new(store), Arc::new(LoggingSessionStore))
        .provider(provider, chain)
        .observer(recorder)
        .ttl(ttl)
        .build();

    let purged = orchestrator.parameters().purge_expired().await?;
    if purged > 0 {
        info!("Purged {} expired PKCE entries", purged);
    }

    if cli.abandon {
        orchestrator.abandon(&name).await?;
        println!("Abandoned in-flight {} sign-in", name);
        return Ok(());
    }

    match &cli.callback_url {
        Some(callback_url) => {
            let params = CallbackParams::from_url(callback_url)?;
            let completed = orchestrator.handle_callback(&name, &params).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&completed).unwrap_or_default()
            );
        }
        None => {
            let request = orchestrator.initiate(&name).await?;
            println!("Open this URL to sign in (flow {}):\n", request.flow_id);
            println!("{}\n", request.url);
            println!("Then run again with --callback-url '<redirected URL>'");
        }
    }

    Ok(())
}

/// Provider preset (if any) with configured overrides applied.
fn provider_config(config: &Config) -> Result<ProviderConfig, Error> {
    let client_id = config.oauth_client_id().ok_or_else(|| {
        oauth_error(
            OAuthErrorKind::InvalidProviderConfig,
            "OAUTH_CLIENT_ID is not set",
        )
    })?;

    let mut provider = if config.oauth_provider == google::NAME {
        google::config(&client_id, &config.oauth_redirect_uri)
    } else {
        let (Some(authorization_url), Some(token_url)) =
            (config.oauth_authorization_url(), config.oauth_token_url())
        else {
            return Err(oauth_error(
                OAuthErrorKind::InvalidProviderConfig,
                &format!(
                    "provider {} needs OAUTH_AUTHORIZATION_URL and OAUTH_TOKEN_URL",
                    config.oauth_provider
                ),
            ));
        };
        ProviderConfig::new(
            &config.oauth_provider,
            &client_id,
            &authorization_url,
            &token_url,
            &config.oauth_redirect_uri,
        )
    };

    if let Some(url) = config.oauth_authorization_url() {
        provider.authorization_endpoint = url;
    }
    if let Some(url) = config.oauth_token_url() {
        provider.token_endpoint = url;
    }
    if let Some(url) = config.oauth_fallback_token_url() {
        provider = provider.with_fallback_token_endpoint(&url);
    }
    if !config.oauth_scopes.is_empty() {
        provider = provider.with_scopes(config.oauth_scopes.clone());
    }

    Ok(provider)
}

fn export_diagnostics(recorder: &Recorder, path: &Path) {
    let sessions = recorder.sessions();
    match serde_json::to_string_pretty(&sessions) {
        Ok(json) => match std::fs::write(path, json) {
            Ok(()) => info!(
                "Wrote {} diagnostic session(s) to {}",
                sessions.len(),
                path.display()
            ),
            Err(e) => error!("Failed to write diagnostics to {}: {}", path.display(), e),
        },
        Err(e) => error!("Failed to serialize diagnostics: {}", e),
    }
}
