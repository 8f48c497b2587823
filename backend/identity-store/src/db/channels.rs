use super::{ChannelRepository, PgStore};
use crate::error::{map_unique_violation, Result};
use crate::models::{Channel, ChannelLookup, NewChannel, NewSecret, Secret};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

const CHANNEL_COLUMNS: &str = "id, name, algorithm, key_use, validity_days, created_at";
const SECRET_COLUMNS: &str =
    "id, channel_id, key_id, algorithm, key_use, issued_at, expires_at, key_material";

async fn load_secrets(conn: &mut PgConnection, channel: &mut Channel) -> Result<()> {
    channel.secrets = sqlx::query_as::<_, Secret>(&format!(
        "SELECT {} FROM secrets WHERE channel_id = $1 ORDER BY issued_at, id",
        SECRET_COLUMNS
    ))
    .bind(channel.id)
    .fetch_all(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl ChannelRepository for PgStore {
    async fn insert_channel(&self, tx: &mut Self::Tx, channel: &NewChannel) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO secret_channels (name, algorithm, key_use, validity_days, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(&channel.name)
        .bind(channel.algorithm.as_str())
        .bind(&channel.key_use)
        .bind(channel.validity_days)
        .bind(channel.created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_unique_violation(e, "channel"))?;

        Ok(id)
    }

    async fn insert_secret(&self, tx: &mut Self::Tx, secret: &NewSecret) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO secrets (
                channel_id, key_id, algorithm, key_use, issued_at, expires_at, key_material
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(secret.channel_id)
        .bind(&secret.key_id)
        .bind(&secret.algorithm)
        .bind(&secret.key_use)
        .bind(secret.issued_at)
        .bind(secret.expires_at)
        .bind(&secret.key_material)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_unique_violation(e, "secret"))?;

        Ok(id)
    }

    async fn find_channel(
        &self,
        tx: &mut Self::Tx,
        lookup: ChannelLookup<'_>,
    ) -> Result<Option<Channel>> {
        let channel = match lookup {
            ChannelLookup::Id(id) => {
                sqlx::query_as::<_, Channel>(&format!(
                    "SELECT {} FROM secret_channels WHERE id = $1",
                    CHANNEL_COLUMNS
                ))
                .bind(id)
                .fetch_optional(&mut **tx)
                .await?
            }
            ChannelLookup::Name(name) => {
                sqlx::query_as::<_, Channel>(&format!(
                    "SELECT {} FROM secret_channels WHERE name = $1",
                    CHANNEL_COLUMNS
                ))
                .bind(name)
                .fetch_optional(&mut **tx)
                .await?
            }
            ChannelLookup::AlgorithmUse(algorithm, key_use) => {
                sqlx::query_as::<_, Channel>(&format!(
                    "SELECT {} FROM secret_channels WHERE algorithm = $1 AND key_use = $2",
                    CHANNEL_COLUMNS
                ))
                .bind(algorithm)
                .bind(key_use)
                .fetch_optional(&mut **tx)
                .await?
            }
        };

        match channel {
            Some(mut channel) => {
                load_secrets(&mut **tx, &mut channel).await?;
                Ok(Some(channel))
            }
            None => Ok(None),
        }
    }

    async fn lock_channel(&self, tx: &mut Self::Tx, channel_id: i64) -> Result<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>(&format!(
            "SELECT {} FROM secret_channels WHERE id = $1 FOR UPDATE",
            CHANNEL_COLUMNS
        ))
        .bind(channel_id)
        .fetch_optional(&mut **tx)
        .await?;

        match channel {
            Some(mut channel) => {
                load_secrets(&mut **tx, &mut channel).await?;
                Ok(Some(channel))
            }
            None => Ok(None),
        }
    }

    async fn list_channels(&self, tx: &mut Self::Tx) -> Result<Vec<Channel>> {
        let mut channels = sqlx::query_as::<_, Channel>(&format!(
            "SELECT {} FROM secret_channels ORDER BY id",
            CHANNEL_COLUMNS
        ))
        .fetch_all(&mut **tx)
        .await?;

        for channel in channels.iter_mut() {
            load_secrets(&mut **tx, channel).await?;
        }

        Ok(channels)
    }

    async fn retire_secrets(
        &self,
        tx: &mut Self::Tx,
        channel_id: i64,
        retire_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE secrets SET expires_at = $2 WHERE channel_id = $1 AND expires_at > $2",
        )
        .bind(channel_id)
        .bind(retire_at)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn all_secrets(&self, tx: &mut Self::Tx) -> Result<Vec<Secret>> {
        let secrets = sqlx::query_as::<_, Secret>(&format!(
            "SELECT {} FROM secrets ORDER BY channel_id, issued_at, id",
            SECRET_COLUMNS
        ))
        .fetch_all(&mut **tx)
        .await?;

        Ok(secrets)
    }

    async fn delete_channel(&self, tx: &mut Self::Tx, channel_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM secret_channels WHERE id = $1")
            .bind(channel_id)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
