use super::{PgStore, TokenRepository};
use crate::error::{map_unique_violation, Result};
use crate::models::{
    Assertion, InvalidationMask, RequestProfile, SignaturePair, TokenKind, TokenRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;

const TOKEN_COLUMNS: &str = "request_id, ac_signature, ac_expires_at, at_signature, \
     at_expires_at, rt_signature, rt_expires_at, profile";

#[derive(FromRow)]
struct TokenRow {
    request_id: String,
    ac_signature: Option<String>,
    ac_expires_at: Option<DateTime<Utc>>,
    at_signature: Option<String>,
    at_expires_at: Option<DateTime<Utc>>,
    rt_signature: Option<String>,
    rt_expires_at: Option<DateTime<Utc>>,
    profile: Json<RequestProfile>,
}

impl From<TokenRow> for TokenRecord {
    fn from(row: TokenRow) -> Self {
        TokenRecord {
            request_id: row.request_id,
            authorization_code: SignaturePair {
                signature: row.ac_signature,
                expires_at: row.ac_expires_at,
            },
            access_token: SignaturePair {
                signature: row.at_signature,
                expires_at: row.at_expires_at,
            },
            refresh_token: SignaturePair {
                signature: row.rt_signature,
                expires_at: row.rt_expires_at,
            },
            profile: row.profile.0,
        }
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn upsert_token(&self, tx: &mut Self::Tx, record: &TokenRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (
                request_id, ac_signature, ac_expires_at, at_signature, at_expires_at,
                rt_signature, rt_expires_at, profile
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (request_id) DO UPDATE
            SET ac_signature = EXCLUDED.ac_signature,
                ac_expires_at = EXCLUDED.ac_expires_at,
                at_signature = EXCLUDED.at_signature,
                at_expires_at = EXCLUDED.at_expires_at,
                rt_signature = EXCLUDED.rt_signature,
                rt_expires_at = EXCLUDED.rt_expires_at,
                profile = EXCLUDED.profile,
                updated_at = NOW()
            "#,
        )
        .bind(&record.request_id)
        .bind(&record.authorization_code.signature)
        .bind(record.authorization_code.expires_at)
        .bind(&record.access_token.signature)
        .bind(record.access_token.expires_at)
        .bind(&record.refresh_token.signature)
        .bind(record.refresh_token.expires_at)
        .bind(Json(&record.profile))
        .execute(&mut **tx)
        .await
        .map_err(|e| map_unique_violation(e, "token signature"))?;

        Ok(())
    }

    async fn find_token_by_signature(
        &self,
        tx: &mut Self::Tx,
        kind: TokenKind,
        signature: &str,
    ) -> Result<Option<TokenRecord>> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {} FROM tokens WHERE {}_signature = $1",
            TOKEN_COLUMNS,
            kind.column()
        ))
        .bind(signature)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(TokenRecord::from))
    }

    async fn expire_token(
        &self,
        tx: &mut Self::Tx,
        request_id: &str,
        mask: InvalidationMask,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tokens
            SET ac_expires_at = CASE WHEN $2 THEN $5 ELSE ac_expires_at END,
                at_expires_at = CASE WHEN $3 THEN $5 ELSE at_expires_at END,
                rt_expires_at = CASE WHEN $4 THEN $5 ELSE rt_expires_at END,
                updated_at = NOW()
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .bind(mask.contains(TokenKind::AuthorizationCode))
        .bind(mask.contains(TokenKind::AccessToken))
        .bind(mask.contains(TokenKind::RefreshToken))
        .bind(at)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_assertion(
        &self,
        tx: &mut Self::Tx,
        assertion: &Assertion,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO assertions (jti, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (jti) DO UPDATE
            SET expires_at = EXCLUDED.expires_at
            WHERE assertions.expires_at <= $3
            "#,
        )
        .bind(&assertion.jti)
        .bind(assertion.expires_at)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_assertions(
        &self,
        tx: &mut Self::Tx,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM assertions WHERE expires_at <= $1")
            .bind(now)
            .execute(&mut **tx)
            .await?;

        Ok(result.rows_affected())
    }
}
