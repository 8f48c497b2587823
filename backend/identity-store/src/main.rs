/// Identity Store bootstrap
///
/// Runs once at deploy time:
/// - applies pending migrations
/// - creates every configured signing-key channel that does not exist yet
/// - rotates channels whose newest key has expired
use anyhow::{Context, Result};
use chrono::Utc;
use identity_store::{
    config::{ChannelSpec, Settings},
    ChannelManager, IdentityError, PgStore, SigningKeyLifecycle,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "identity_store=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();

    info!("Starting identity store bootstrap");

    let settings = Settings::load().context("Failed to load configuration")?;
    settings.database.log_config();

    let pool = db_pool::create_pool(settings.database.clone())
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = PgStore::new(pool);
    store.migrate().await.context("Failed to run migrations")?;
    info!("Database migrations applied");

    let manager = ChannelManager::new(
        store,
        settings.keys.rotation_overlap,
        settings.operation_timeout,
    );

    for spec in &settings.keys.bootstrap_channels {
        ensure_channel(&manager, spec).await?;
    }

    let now = Utc::now();
    let mut rotated = 0;
    for channel in manager.list_channels().await.context("Failed to list channels")? {
        let stale = channel
            .newest_secret()
            .map_or(true, |secret| secret.is_expired_at(now));
        if stale {
            manager
                .renew_secret(channel.id)
                .await
                .with_context(|| format!("Failed to rotate channel {}", channel.name))?;
            rotated += 1;
        }
    }

    info!(
        configured = settings.keys.bootstrap_channels.len(),
        rotated = rotated,
        "Identity store bootstrap complete"
    );
    Ok(())
}

async fn ensure_channel(manager: &ChannelManager<PgStore>, spec: &ChannelSpec) -> Result<()> {
    match manager.get_channel_by_name(&spec.name).await {
        Ok(channel) => {
            if channel.algorithm != spec.algorithm || channel.key_use != spec.key_use {
                warn!(
                    name = %spec.name,
                    stored_algorithm = %channel.algorithm,
                    stored_use = %channel.key_use,
                    "Existing channel differs from configuration, leaving it as is"
                );
            }
            Ok(())
        }
        Err(IdentityError::NotFound(_)) => {
            let id = manager
                .create_channel(&spec.name, &spec.algorithm, &spec.key_use, spec.validity_days)
                .await
                .with_context(|| format!("Failed to create channel {}", spec.name))?;
            info!(channel_id = id, name = %spec.name, "Created configured channel");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to look up channel {}", spec.name)),
    }
}
