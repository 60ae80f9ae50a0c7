//! PostgreSQL store for affiliations, identities and certificates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, instrument};

use super::metrics::DB_QUERY_DURATION;
use super::store::{AffiliationStore, StoreError, StoreTransaction};
use crate::models::{
    AffiliationNode, AffiliationPath, CertificateRecord, CertificateStatus, IdentityRecord,
    RevocationReason,
};

/// Connection pool wrapper implementing [`AffiliationStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "affiliation-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Register an identity together with its attributes.
    #[instrument(skip(self, identity), fields(identity_id = %identity.id))]
    pub async fn register_identity(&self, identity: &IdentityRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO identities (id, affiliation) VALUES ($1, $2)")
            .bind(&identity.id)
            .bind(identity.affiliation.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_write_error(e, format!("identity '{}'", identity.id)))?;

        for (name, value) in &identity.attributes {
            sqlx::query(
                "INSERT INTO identity_attributes (identity_id, name, value) VALUES ($1, $2, $3)",
            )
            .bind(&identity.id)
            .bind(name)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Record an issued certificate.
    #[instrument(skip(self, certificate), fields(serial = %certificate.serial))]
    pub async fn record_certificate(
        &self,
        certificate: &CertificateRecord,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO certificates (serial, identity_id, status, reason, revoked_utc, issued_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&certificate.serial)
        .bind(&certificate.identity_id)
        .bind(certificate.status.as_str())
        .bind(certificate.reason.map(RevocationReason::code))
        .bind(certificate.revoked_utc)
        .bind(certificate.issued_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, format!("certificate '{}'", certificate.serial)))?;
        Ok(())
    }

    async fn load_attributes(
        &self,
        ids: &[String],
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String)>(
            "SELECT identity_id, name, value FROM identity_attributes WHERE identity_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut attributes: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (identity_id, name, value) in rows {
            attributes.entry(identity_id).or_default().insert(name, value);
        }
        Ok(attributes)
    }

    async fn hydrate(&self, rows: Vec<IdentityRow>) -> Result<Vec<IdentityRecord>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let mut attributes = self.load_attributes(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let attrs = attributes.remove(&row.id).unwrap_or_default();
                row.into_record(attrs)
            })
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct AffiliationRow {
    name: String,
    created_utc: DateTime<Utc>,
}

impl TryFrom<AffiliationRow> for AffiliationNode {
    type Error = StoreError;

    fn try_from(row: AffiliationRow) -> Result<Self, Self::Error> {
        let path = AffiliationPath::parse(&row.name)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(AffiliationNode {
            path,
            created_utc: row.created_utc,
        })
    }
}

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: String,
    affiliation: String,
}

impl IdentityRow {
    fn into_record(self, attributes: BTreeMap<String, String>) -> Result<IdentityRecord, StoreError> {
        let affiliation = AffiliationPath::parse(&self.affiliation)
            .map_err(|e| StoreError::Corrupt(format!("identity '{}': {}", self.id, e)))?;
        Ok(IdentityRecord {
            id: self.id,
            affiliation,
            attributes,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CertificateRow {
    serial: String,
    identity_id: String,
    status: String,
    reason: Option<i32>,
    revoked_utc: Option<DateTime<Utc>>,
    issued_utc: DateTime<Utc>,
}

impl TryFrom<CertificateRow> for CertificateRecord {
    type Error = StoreError;

    fn try_from(row: CertificateRow) -> Result<Self, Self::Error> {
        let status = CertificateStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!(
                "certificate '{}' has unknown status '{}'",
                row.serial, row.status
            ))
        })?;
        let reason = match row.reason {
            Some(code) => Some(RevocationReason::from_code(code).ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "certificate '{}' has unknown reason code {}",
                    row.serial, code
                ))
            })?),
            None => None,
        };
        Ok(CertificateRecord {
            serial: row.serial,
            identity_id: row.identity_id,
            status,
            reason,
            revoked_utc: row.revoked_utc,
            issued_utc: row.issued_utc,
        })
    }
}

fn map_write_error(e: sqlx::Error, what: String) -> StoreError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict(format!("{} already exists", what))
        }
        other => StoreError::Database(other),
    }
}

#[async_trait]
impl AffiliationStore for PgStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Affiliation Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self), fields(affiliation = %path))]
    async fn get_affiliation(
        &self,
        path: &AffiliationPath,
    ) -> Result<Option<AffiliationNode>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_affiliation"])
            .start_timer();

        let row = sqlx::query_as::<_, AffiliationRow>(
            "SELECT name, created_utc FROM affiliations WHERE name = $1",
        )
        .bind(path.to_string())
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        row.map(AffiliationNode::try_from).transpose()
    }

    #[instrument(skip(self), fields(filter = %filter))]
    async fn get_affiliations(
        &self,
        filter: &AffiliationPath,
    ) -> Result<Vec<AffiliationNode>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_affiliations"])
            .start_timer();

        let rows = sqlx::query_as::<_, AffiliationRow>(
            r#"
            SELECT name, created_utc FROM affiliations
            WHERE $1 = '' OR name = $1 OR left(name, length($1) + 1) = $1 || '.'
            "#,
        )
        .bind(filter.to_string())
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();

        let mut nodes = rows
            .into_iter()
            .map(AffiliationNode::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(nodes)
    }

    // -------------------------------------------------------------------------
    // Identity Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>(
            "SELECT id, affiliation FROM identities WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(affiliation = %path))]
    async fn find_identities_by_affiliation(
        &self,
        path: &AffiliationPath,
        include_descendants: bool,
    ) -> Result<Vec<IdentityRecord>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_identities_by_affiliation"])
            .start_timer();

        let rows = sqlx::query_as::<_, IdentityRow>(
            r#"
            SELECT id, affiliation FROM identities
            WHERE affiliation = $1
               OR ($2 AND ($1 = '' OR left(affiliation, length($1) + 1) = $1 || '.'))
            ORDER BY seq
            "#,
        )
        .bind(path.to_string())
        .bind(include_descendants)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        self.hydrate(rows).await
    }

    #[instrument(skip(self))]
    async fn get_identity_attribute(
        &self,
        id: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM identity_attributes WHERE identity_id = $1 AND name = $2",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    // -------------------------------------------------------------------------
    // Certificate Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn find_certificates_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<CertificateRecord>, StoreError> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT serial, identity_id, status, reason, revoked_utc, issued_utc
            FROM certificates
            WHERE identity_id = $1
            ORDER BY issued_utc, serial
            "#,
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CertificateRecord::try_from).collect()
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// A PostgreSQL transaction. Rolled back on drop unless committed.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn create_affiliation(&mut self, path: &AffiliationPath) -> Result<(), StoreError> {
        let prekey = path.parent().map(|p| p.to_string()).unwrap_or_default();
        let level = path.depth().saturating_sub(1) as i32;

        sqlx::query("INSERT INTO affiliations (name, prekey, level) VALUES ($1, $2, $3)")
            .bind(path.to_string())
            .bind(prekey)
            .bind(level)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_write_error(e, format!("affiliation '{}'", path)))?;
        Ok(())
    }

    async fn delete_affiliation(&mut self, path: &AffiliationPath) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM affiliations WHERE name = $1")
            .bind(path.to_string())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("affiliation '{}'", path)));
        }
        Ok(())
    }

    async fn update_identity_affiliation(
        &mut self,
        id: &str,
        affiliation: &AffiliationPath,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE identities SET affiliation = $2 WHERE id = $1")
            .bind(id)
            .bind(affiliation.to_string())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("identity '{}'", id)));
        }
        Ok(())
    }

    async fn delete_identity(&mut self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("identity '{}'", id)));
        }
        Ok(())
    }

    async fn revoke_certificate(
        &mut self,
        serial: &str,
        reason: RevocationReason,
    ) -> Result<(), StoreError> {
        // Keep the first revocation reason.
        let result = sqlx::query(
            r#"
            UPDATE certificates
            SET status = 'revoked',
                reason = COALESCE(reason, $2),
                revoked_utc = COALESCE(revoked_utc, NOW())
            WHERE serial = $1
            "#,
        )
        .bind(serial)
        .bind(reason.code())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("certificate '{}'", serial)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
