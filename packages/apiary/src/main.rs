use std::time::Duration;

use aerosol::Aero;
use clap::Parser;
use color_eyre::Result;
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use apiary::{
    api,
    credentials::{CredentialResolver, ResolverConfig},
    db::Postgres,
    secrets::{CipherConfig, SecretCipher},
    swarm::{SwarmConfig, SwarmGateway, SwarmProvisioner},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Config {
    /// Database URL (Postgres)
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Active field-encryption key, 64 hex characters
    #[arg(long, env = "TOKEN_ENCRYPTION_KEY", hide_env_values = true)]
    token_encryption_key: String,

    /// Identifier of the active key, embedded in new envelopes
    #[arg(long, env = "TOKEN_ENCRYPTION_KEY_ID", default_value = "k1")]
    token_encryption_key_id: String,

    /// Retired decryption keys as `id=hex` pairs, comma separated
    #[arg(long, env = "TOKEN_DECRYPTION_KEYS", hide_env_values = true)]
    token_decryption_keys: Option<String>,

    /// Substring marking mock/test account emails
    #[arg(long, env = "MOCK_EMAIL_MARKER", default_value = "mock.dev")]
    mock_email_marker: String,

    /// Base URL of the remote swarm provisioning service
    #[arg(long, env = "SWARM_API_BASE_URL")]
    swarm_api_base_url: Url,

    /// Service key for the provisioning API
    #[arg(long, env = "SWARM_API_KEY", hide_env_values = true)]
    swarm_api_key: String,

    /// Timeout for provisioning calls, in seconds
    #[arg(long, env = "SWARM_API_TIMEOUT_SECS", default_value = "30")]
    swarm_api_timeout_secs: u64,

    /// Instance class requested for new swarms
    #[arg(long, env = "SWARM_INSTANCE_TYPE", default_value = "m6i.xlarge")]
    swarm_instance_type: String,
}

impl Config {
    fn cipher_config(&self) -> Result<CipherConfig> {
        let mut config = CipherConfig::single(
            self.token_encryption_key_id.clone(),
            &self.token_encryption_key,
        )?;
        if let Some(extra) = &self.token_decryption_keys {
            for pair in extra.split(',').filter(|p| !p.trim().is_empty()) {
                let (id, hex) = pair
                    .split_once('=')
                    .ok_or_else(|| color_eyre::eyre::eyre!("expected id=hex, got '{pair}'"))?;
                config = config.with_key(id.trim(), hex)?;
            }
        }
        Ok(config)
    }

    fn swarm_config(&self) -> SwarmConfig {
        SwarmConfig {
            base_url: self.swarm_api_base_url.clone(),
            service_key: self.swarm_api_key.clone(),
            timeout: Duration::from_secs(self.swarm_api_timeout_secs),
            instance_type: self.swarm_instance_type.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_tree::HierarchicalLayer::default()
                .with_indent_lines(true)
                .with_indent_amount(2)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_verbose_exit(false)
                .with_verbose_entry(false)
                .with_deferred_spans(true)
                .with_bracketed_fields(true)
                .with_span_retrace(true)
                .with_targets(false),
        )
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cipher = SecretCipher::new(&config.cipher_config()?)?;
    let resolver = CredentialResolver::new(
        &ResolverConfig {
            mock_email_marker: config.mock_email_marker.clone(),
        },
        cipher.clone(),
    );

    let swarm_config = config.swarm_config();
    let gateway = SwarmGateway::new(&swarm_config)?;
    let provisioner = SwarmProvisioner::new(gateway, cipher.clone(), swarm_config.instance_type);

    let db = Postgres::connect(&config.database_url).await?;
    db.run_migrations().await?;

    // Dependencies are provided in reverse order of the State list.
    let state: api::State = Aero::new()
        .with(provisioner)
        .with(resolver)
        .with(cipher)
        .with(db);

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
