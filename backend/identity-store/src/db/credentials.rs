use super::{CredentialRepository, PgStore};
use crate::error::Result;
use crate::models::{Credential, CredentialType, UserOtp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
impl CredentialRepository for PgStore {
    async fn find_credential_for_update(
        &self,
        tx: &mut Self::Tx,
        user_id: Uuid,
        cred_type: CredentialType,
    ) -> Result<Option<Credential>> {
        let credential = sqlx::query_as::<_, Credential>(
            r#"
            SELECT id, user_id, cred_type, value, first_invalid_attempt,
                   invalid_attempt_count, blocked, updated_at
            FROM user_credentials
            WHERE user_id = $1 AND cred_type = $2
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(cred_type)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(credential)
    }

    async fn save_credential(&self, tx: &mut Self::Tx, credential: &Credential) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_credentials (
                id, user_id, cred_type, value, first_invalid_attempt,
                invalid_attempt_count, blocked, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, cred_type) DO UPDATE
            SET value = EXCLUDED.value,
                first_invalid_attempt = EXCLUDED.first_invalid_attempt,
                invalid_attempt_count = EXCLUDED.invalid_attempt_count,
                blocked = EXCLUDED.blocked,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(credential.id)
        .bind(credential.user_id)
        .bind(credential.cred_type)
        .bind(&credential.value)
        .bind(credential.first_invalid_attempt)
        .bind(credential.invalid_attempt_count)
        .bind(credential.blocked)
        .bind(credential.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn insert_user_otp(&self, tx: &mut Self::Tx, otp: &UserOtp) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_otps (id, user_id, code_hash, created_at, consumed_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(otp.id)
        .bind(otp.user_id)
        .bind(&otp.code_hash)
        .bind(otp.created_at)
        .bind(otp.consumed_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn find_unconsumed_user_otp(
        &self,
        tx: &mut Self::Tx,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<Option<UserOtp>> {
        let otp = sqlx::query_as::<_, UserOtp>(
            r#"
            SELECT id, user_id, code_hash, created_at, consumed_at
            FROM user_otps
            WHERE user_id = $1 AND code_hash = $2 AND consumed_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(code_hash)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(otp)
    }

    async fn consume_user_otp(
        &self,
        tx: &mut Self::Tx,
        otp_id: Uuid,
        consumed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE user_otps SET consumed_at = $2 WHERE id = $1")
            .bind(otp_id)
            .bind(consumed_at)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }
}
