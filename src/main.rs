use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use feedmill::config::{Config, PlatformSection};
use feedmill::coordinator::{Coordinator, FetchGenerator, Generate};
use feedmill::export::{export, LocalObjectStore, ObjectStore};
use feedmill::fetch::{FetchClient, RateLimiter, TimestampSigner};
use feedmill::key::ResourceKey;
use feedmill::notify::{Notifier, NoopNotifier, WebhookNotifier};
use feedmill::storage::{Cache, CredentialStore, Database, MemoryCache, MemoryCredentialStore};

#[derive(Parser, Debug)]
#[command(name = "feedmill", about = "Cached feed generation and export for platform APIs")]
struct Args {
    /// Config file path
    #[arg(long, value_name = "FILE", default_value = "feedmill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the feed document for a key, generating and caching it on a miss
    Get {
        /// Resource key, platform:kind:ident
        key: ResourceKey,
    },
    /// Render the document for a key and upload it to the export store
    Export {
        /// Resource key, platform:kind:ident
        key: ResourceKey,
        /// Object key in the export store
        #[arg(long)]
        object: String,
    },
    /// Store a credential for a platform
    Login {
        platform: String,
        token: String,
    },
    /// Delete expired cache rows from the sqlite backend
    Evict,
}

/// Shared backends, selected by `[cache] backend`.
struct Services {
    cache: Arc<dyn Cache>,
    credentials: Arc<dyn CredentialStore>,
}

async fn open_services(config: &Config) -> Result<Services> {
    match config.cache.backend.as_str() {
        "memory" => Ok(Services {
            cache: Arc::new(MemoryCache::default()),
            credentials: Arc::new(MemoryCredentialStore::default()),
        }),
        "sqlite" => {
            let path = config.cache.path.to_string_lossy().into_owned();
            let db = Arc::new(
                Database::open(&path)
                    .await
                    .with_context(|| format!("Failed to open database at {path}"))?,
            );
            Ok(Services {
                cache: db.clone(),
                credentials: db,
            })
        }
        other => bail!("Unknown cache backend '{other}' (expected 'sqlite' or 'memory')"),
    }
}

fn platform_section<'a>(config: &'a Config, key: &ResourceKey) -> Result<&'a PlatformSection> {
    config.platforms.get(key.platform()).with_context(|| {
        format!(
            "No [platforms.{}] section configured for key {key}",
            key.platform()
        )
    })
}

fn build_generator(
    config: &Config,
    platform: &PlatformSection,
    credentials: Arc<dyn CredentialStore>,
) -> Result<FetchGenerator> {
    let secret = platform
        .app_secret
        .as_deref()
        .context("Platform section is missing app_secret")?;

    let client = FetchClient::new(
        reqwest::Client::new(),
        Arc::new(RateLimiter::start((&config.limiter).into())),
        credentials,
        Arc::new(TimestampSigner::new(secret)),
        platform.credential_kind.clone(),
        config.fetch.api_codes(),
        config.fetch.fetch_config(),
    );
    Ok(FetchGenerator::new(
        Arc::new(client),
        platform.endpoint.clone(),
    ))
}

fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    match &config.notify.webhook_url {
        Some(raw) => {
            let endpoint = Url::parse(raw).context("Invalid notify.webhook_url")?;
            Ok(Arc::new(WebhookNotifier::new(endpoint)?))
        }
        None => Ok(Arc::new(NoopNotifier)),
    }
}

async fn run_get(config: &Config, key: ResourceKey) -> Result<()> {
    let services = open_services(config).await?;
    let platform = platform_section(config, &key)?;
    let generator = build_generator(config, platform, services.credentials.clone())?;

    let coordinator = Coordinator::spawn(
        services.cache,
        Arc::new(generator),
        config.coordinator_config(),
    );
    let result = coordinator.get(key).await;
    coordinator.shutdown().await;

    println!("{}", result?);
    Ok(())
}

async fn run_export(config: &Config, key: ResourceKey, object: String) -> Result<()> {
    let services = open_services(config).await?;
    let platform = platform_section(config, &key)?;
    let generator: Arc<dyn Generate> = Arc::new(build_generator(
        config,
        platform,
        services.credentials.clone(),
    )?);
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(config.export.root.clone()));
    let notifier = build_notifier(config)?;

    let render = {
        let generator = generator.clone();
        let key = key.clone();
        move |mut out: Box<dyn AsyncWrite + Send + Unpin>| {
            let generator = generator.clone();
            let key = key.clone();
            async move {
                let content = generator.generate(&key).await?;
                out.write_all(content.as_bytes()).await?;
                Ok::<_, anyhow::Error>(())
            }
        }
    };

    let outcome = export(&render, store, &object, None).await;
    let (title, body) = match &outcome {
        Ok(()) => ("Export complete".to_string(), object.clone()),
        Err(e) => ("Export failed".to_string(), format!("{object}: {e}")),
    };
    if let Err(e) = notifier.notify(&title, &body).await {
        tracing::warn!(error = %e, "Failed to deliver export notification");
    }

    outcome?;
    println!("Exported {key} to {object}");
    Ok(())
}

async fn run_login(config: &Config, platform_name: &str, token: String) -> Result<()> {
    let services = open_services(config).await?;
    let kind = config
        .platforms
        .get(platform_name)
        .map(|p| p.credential_kind.clone())
        .with_context(|| format!("No [platforms.{platform_name}] section configured"))?;

    services
        .credentials
        .set(&kind, SecretString::from(token), None)
        .await?;
    println!("Stored credential '{kind}' for {platform_name}");
    Ok(())
}

async fn run_evict(config: &Config) -> Result<()> {
    if config.cache.backend != "sqlite" {
        bail!("Evict only applies to the sqlite backend");
    }
    let path = config.cache.path.to_string_lossy().into_owned();
    let db = Database::open(&path)
        .await
        .with_context(|| format!("Failed to open database at {path}"))?;
    let evicted = db.cache_evict_expired().await?;
    println!("Evicted {evicted} expired cache rows");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config).context("Failed to load configuration")?;

    match args.command {
        Command::Get { key } => run_get(&config, key).await,
        Command::Export { key, object } => run_export(&config, key, object).await,
        Command::Login { platform, token } => run_login(&config, &platform, token).await,
        Command::Evict => run_evict(&config).await,
    }
}
